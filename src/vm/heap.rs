use std::time::{Duration, Instant};

use log::debug;

use super::class::ClassTable;
use super::frame::FrameStack;
use super::value::Value;
use crate::error::ConfigError;

// =============================================================================
// Object Layout
// =============================================================================
//
// Every object starts with a one-word header. All words are 8 bytes.
//
//   array:      [ARRAY_TAG][length][item 0 .. item length-1]
//   object:     [CLASS_TAG_BASE + class][parent][slot 0 .. slot nvars-1]
//   forwarding: [FORWARD_TAG][new address]
//
// Forwarding records only exist in from-space while a collection runs.
// Every object is at least two words, so a forwarding record always fits.

const WORD: usize = 8;
const HEADER_WORDS: usize = 2;

const ARRAY_TAG: u64 = 0;
const CLASS_TAG_BASE: u64 = 1;
const FORWARD_TAG: u64 = u64::MAX;

// =============================================================================
// Byte-level access helpers for Vec<u8> memory
// =============================================================================

/// Read a u64 from the byte buffer at the given byte offset (must be 8-byte aligned).
#[inline(always)]
fn read_u64(memory: &[u8], byte_offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&memory[byte_offset..byte_offset + WORD]);
    u64::from_le_bytes(bytes)
}

/// Write a u64 to the byte buffer at the given byte offset (must be 8-byte aligned).
#[inline(always)]
fn write_u64(memory: &mut [u8], byte_offset: usize, value: u64) {
    memory[byte_offset..byte_offset + WORD].copy_from_slice(&value.to_le_bytes());
}

/// The visible shape of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Array { len: usize },
    Object { class: usize },
}

/// Size and traced fields of one object, derived from its header.
///
/// Both the copier and the scanner go through this, so the two never disagree
/// about an object's extent.
#[derive(Debug, Clone, Copy)]
struct Layout {
    size: usize,
    /// Byte offset of the first traced word.
    fields_start: usize,
    fields_end: usize,
}

/// Collector statistics.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub cycles: usize,
    pub bytes_copied: u64,
    pub total_pause: Duration,
    pub max_pause: Duration,
}

/// Everything the collector treats as a root.
pub struct Roots<'a> {
    pub stack: &'a mut [Value],
    pub frames: &'a mut FrameStack,
    pub globals: &'a mut [Value],
}

/// A semispace copying heap.
///
/// Both semispaces live in one linear memory at disjoint offsets, so an
/// address unambiguously belongs to one of them.
#[derive(Debug)]
pub struct Heap {
    memory: Vec<u8>,
    semispace: usize,
    /// Base offset of the current semispace (0 or `semispace`).
    from: usize,
    top: usize,
    limit: usize,
    stats: GcStats,
}

impl Heap {
    /// Create a heap with `semispace_bytes` per semispace, rounded up to a
    /// whole number of words.
    pub fn new(semispace_bytes: usize) -> Result<Self, ConfigError> {
        let too_large = || ConfigError::HeapSize {
            size: semispace_bytes,
        };
        let semispace = semispace_bytes
            .div_ceil(WORD)
            .checked_mul(WORD)
            .ok_or_else(too_large)?;
        let total = semispace.checked_mul(2).ok_or_else(too_large)?;
        let mut memory = Vec::new();
        memory.try_reserve_exact(total).map_err(|_| too_large())?;
        memory.resize(total, 0);
        Ok(Self {
            memory,
            semispace,
            from: 0,
            top: 0,
            limit: semispace,
            stats: GcStats::default(),
        })
    }

    pub fn semispace_size(&self) -> usize {
        self.semispace
    }

    /// Bytes in use in the current semispace.
    pub fn used(&self) -> usize {
        self.top - self.from
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Whether `value` refers to a live object in the current semispace.
    pub fn in_current_space(&self, value: Value) -> bool {
        value
            .addr()
            .is_some_and(|addr| addr >= self.from && addr < self.top)
    }

    // ========================================
    // Allocation
    // ========================================

    fn bump(&mut self, size: usize) -> Option<usize> {
        let end = self.top.checked_add(size)?;
        if end > self.limit {
            return None;
        }
        let addr = self.top;
        self.top = end;
        Some(addr)
    }

    /// Bytes needed for an array of `len` items, or `None` on overflow.
    pub fn array_size(len: usize) -> Option<usize> {
        len.checked_add(HEADER_WORDS)?.checked_mul(WORD)
    }

    /// Bytes needed for an instance with `nvars` variables.
    pub fn object_size(nvars: usize) -> usize {
        (nvars + HEADER_WORDS) * WORD
    }

    /// Allocate an array with every item set to `init`. Returns `None` if the
    /// current semispace is exhausted.
    pub fn try_alloc_array(&mut self, len: usize, init: Value) -> Option<Value> {
        let addr = self.bump(Self::array_size(len)?)?;
        write_u64(&mut self.memory, addr, ARRAY_TAG);
        write_u64(&mut self.memory, addr + WORD, len as u64);
        for i in 0..len {
            write_u64(&mut self.memory, addr + (HEADER_WORDS + i) * WORD, init.raw());
        }
        Some(Value::from_addr(addr))
    }

    /// Allocate an instance of `class` with a null parent and null slots.
    pub fn try_alloc_object(&mut self, class: usize, nvars: usize) -> Option<Value> {
        let addr = self.bump(Self::object_size(nvars))?;
        write_u64(&mut self.memory, addr, CLASS_TAG_BASE + class as u64);
        for i in 1..HEADER_WORDS + nvars {
            write_u64(&mut self.memory, addr + i * WORD, Value::null().raw());
        }
        Some(Value::from_addr(addr))
    }

    // ========================================
    // Accessors
    // ========================================

    fn addr_of(&self, value: Value) -> usize {
        let addr = value.addr().unwrap_or(usize::MAX);
        debug_assert!(self.in_current_space(value), "stale or non-heap ref {value:?}");
        addr
    }

    fn header(&self, value: Value) -> u64 {
        read_u64(&self.memory, self.addr_of(value))
    }

    /// Shape of the object `value` refers to, or `None` for ints and null.
    pub fn shape(&self, value: Value) -> Option<Shape> {
        if !value.is_object() {
            return None;
        }
        let addr = self.addr_of(value);
        match read_u64(&self.memory, addr) {
            ARRAY_TAG => Some(Shape::Array {
                len: read_u64(&self.memory, addr + WORD) as usize,
            }),
            tag => Some(Shape::Object {
                class: (tag - CLASS_TAG_BASE) as usize,
            }),
        }
    }

    pub fn array_len(&self, array: Value) -> usize {
        debug_assert_eq!(self.header(array), ARRAY_TAG);
        read_u64(&self.memory, self.addr_of(array) + WORD) as usize
    }

    pub fn array_get(&self, array: Value, index: usize) -> Value {
        debug_assert!(index < self.array_len(array));
        let addr = self.addr_of(array) + (HEADER_WORDS + index) * WORD;
        Value::from_raw(read_u64(&self.memory, addr))
    }

    pub fn array_set(&mut self, array: Value, index: usize, value: Value) {
        debug_assert!(index < self.array_len(array));
        let addr = self.addr_of(array) + (HEADER_WORDS + index) * WORD;
        write_u64(&mut self.memory, addr, value.raw());
    }

    pub fn object_class(&self, object: Value) -> usize {
        let tag = self.header(object);
        debug_assert!(tag != ARRAY_TAG && tag != FORWARD_TAG);
        (tag - CLASS_TAG_BASE) as usize
    }

    pub fn object_parent(&self, object: Value) -> Value {
        Value::from_raw(read_u64(&self.memory, self.addr_of(object) + WORD))
    }

    pub fn set_object_parent(&mut self, object: Value, parent: Value) {
        let addr = self.addr_of(object) + WORD;
        write_u64(&mut self.memory, addr, parent.raw());
    }

    pub fn object_slot(&self, object: Value, index: usize) -> Value {
        let addr = self.addr_of(object) + (HEADER_WORDS + index) * WORD;
        Value::from_raw(read_u64(&self.memory, addr))
    }

    pub fn set_object_slot(&mut self, object: Value, index: usize, value: Value) {
        let addr = self.addr_of(object) + (HEADER_WORDS + index) * WORD;
        write_u64(&mut self.memory, addr, value.raw());
    }

    // ========================================
    // Collection
    // ========================================

    fn layout(&self, addr: usize, classes: &ClassTable) -> Layout {
        match read_u64(&self.memory, addr) {
            ARRAY_TAG => {
                let len = read_u64(&self.memory, addr + WORD) as usize;
                Layout {
                    size: (HEADER_WORDS + len) * WORD,
                    fields_start: addr + HEADER_WORDS * WORD,
                    fields_end: addr + (HEADER_WORDS + len) * WORD,
                }
            }
            tag => {
                debug_assert_ne!(tag, FORWARD_TAG, "layout of a forwarding record");
                let nvars = classes.nvars((tag - CLASS_TAG_BASE) as usize);
                // The parent word is traced along with the slots.
                Layout {
                    size: Self::object_size(nvars),
                    fields_start: addr + WORD,
                    fields_end: addr + (HEADER_WORDS + nvars) * WORD,
                }
            }
        }
    }

    /// Copy the object behind `value` to to-space unless that already
    /// happened, and return its new reference. Non-references pass through.
    fn forward(&mut self, value: Value, classes: &ClassTable) -> Value {
        let Some(addr) = value.addr() else {
            return value;
        };
        if read_u64(&self.memory, addr) == FORWARD_TAG {
            return Value::from_raw(read_u64(&self.memory, addr + WORD));
        }

        let layout = self.layout(addr, classes);
        let new_addr = self.top;
        self.top += layout.size;
        debug_assert!(self.top <= self.limit, "to-space overflow");
        self.memory.copy_within(addr..addr + layout.size, new_addr);

        let new_ref = Value::from_addr(new_addr);
        write_u64(&mut self.memory, addr, FORWARD_TAG);
        write_u64(&mut self.memory, addr + WORD, new_ref.raw());
        self.stats.bytes_copied += layout.size as u64;
        new_ref
    }

    /// Run a full copying collection.
    ///
    /// Roots are forwarded in order: operand stack, frame stack, globals.
    /// Then to-space is scanned breadth-first until the scan cursor meets the
    /// allocation cursor. Afterwards every root and every reachable field
    /// refers into the new current semispace.
    pub fn collect(&mut self, roots: Roots<'_>, classes: &ClassTable) {
        let start = Instant::now();
        let before = self.used();

        let to = if self.from == 0 { self.semispace } else { 0 };
        self.from = to;
        self.top = to;
        self.limit = to + self.semispace;

        for slot in roots.stack.iter_mut() {
            *slot = self.forward(*slot, classes);
        }
        roots
            .frames
            .for_each_root(|slot| *slot = self.forward(*slot, classes));
        for slot in roots.globals.iter_mut() {
            *slot = self.forward(*slot, classes);
        }

        let mut scan = to;
        while scan < self.top {
            let layout = self.layout(scan, classes);
            let mut field = layout.fields_start;
            while field < layout.fields_end {
                let value = Value::from_raw(read_u64(&self.memory, field));
                let moved = self.forward(value, classes);
                write_u64(&mut self.memory, field, moved.raw());
                field += WORD;
            }
            scan += layout.size;
        }

        let pause = start.elapsed();
        self.stats.cycles += 1;
        self.stats.total_pause += pause;
        self.stats.max_pause = self.stats.max_pause.max(pause);
        debug!(
            "gc #{}: {} -> {} bytes live in {:?}",
            self.stats.cycles,
            before,
            self.used(),
            pause
        );
    }
}

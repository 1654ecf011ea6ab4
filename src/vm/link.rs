//! Quickening linker.
//!
//! Turns a [`Program`] into one flat, self-relocated code buffer:
//!
//! 1. Methods: every method body is quickened in pool order. References to
//!    code, globals or classes that may not exist yet are written as zeroed
//!    placeholders and recorded as [`Patch`]es.
//! 2. Classes: class layouts are built; method slots take their code offsets
//!    from the entries recorded in pass 1.
//! 3. Globals: top-level functions are aliased under their names, global
//!    variables are assigned slot indices, then every patch is resolved.

use std::collections::HashMap;

use log::{debug, trace};

use super::class::{CClass, ClassTable, SlotDecl, Symbol, Symbols};
use super::codebuf::CodeBuffer;
use super::ops::Opcode;
use crate::error::LinkError;
use crate::program::{Constant, Ins, Program};

/// The linked, directly executable form of a program.
#[derive(Debug, Clone)]
pub struct Image {
    pub code: CodeBuffer,
    pub classes: ClassTable,
    pub symbols: Symbols,
    /// Printf format strings, indexed by the `PRINTF` payload.
    pub strings: Vec<String>,
    /// Global variable names, indexed by global slot.
    pub globals: Vec<Symbol>,
    /// Code offset of the entry method.
    pub entry: usize,
}

/// Symbol table key: a name for labels and aliased functions, or the pool
/// index of a method or class constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Name(Symbol),
    Const(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Method { offset: usize, nargs: u32 },
    Label(usize),
    Class(usize),
}

impl Entry {
    fn kind_name(self) -> &'static str {
        match self {
            Entry::Method { .. } => "method",
            Entry::Label(_) => "label",
            Entry::Class(_) => "class",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchKind {
    /// 8-byte code offset of a free-standing function, called with `arity`
    /// arguments.
    Function { arity: u32 },
    /// 8-byte code offset of a label.
    Label,
    /// 4-byte global slot index.
    Global,
    /// 4-byte instance variable count of a class.
    ClassArity,
    /// 4-byte class index.
    ClassTag,
}

/// A deferred fixup at `position` in the code buffer.
#[derive(Debug, Clone, Copy)]
struct Patch {
    kind: PatchKind,
    position: usize,
    key: Key,
}

/// Link a program into an executable [`Image`].
pub fn link(program: &Program) -> Result<Image, LinkError> {
    Linker::new(program).link()
}

struct Linker<'a> {
    program: &'a Program,
    code: CodeBuffer,
    entries: HashMap<Key, Entry>,
    patches: Vec<Patch>,
    classes: ClassTable,
    symbols: Symbols,
    strings: Vec<String>,
    string_slots: HashMap<usize, usize>,
    globals: Vec<Symbol>,
    /// Pool index and `nargs + nlocals` of the method being quickened.
    method: usize,
    frame_size: u32,
}

impl<'a> Linker<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            code: CodeBuffer::new(),
            entries: HashMap::new(),
            patches: Vec::new(),
            classes: ClassTable::new(),
            symbols: Symbols::new(),
            strings: Vec::new(),
            string_slots: HashMap::new(),
            globals: Vec::new(),
            method: 0,
            frame_size: 0,
        }
    }

    fn link(mut self) -> Result<Image, LinkError> {
        self.link_methods()?;
        self.link_classes()?;
        self.link_globals()?;
        self.resolve_patches()?;

        let entry = match self.entries.get(&Key::Const(self.program.entry)) {
            Some(Entry::Method { offset, .. }) => *offset,
            _ => {
                return Err(LinkError::BadEntry {
                    index: self.program.entry,
                });
            }
        };

        debug!(
            "linked {} bytes of code, {} classes, {} globals, entry at {}",
            self.code.len(),
            self.classes.len(),
            self.globals.len(),
            entry
        );

        Ok(Image {
            code: self.code,
            classes: self.classes,
            symbols: self.symbols,
            strings: self.strings,
            globals: self.globals,
            entry,
        })
    }

    // ========================================
    // Entries
    // ========================================

    fn define(&mut self, key: Key, entry: Entry) -> Result<(), LinkError> {
        if self.entries.contains_key(&key) {
            return Err(LinkError::DuplicateSymbol {
                symbol: self.describe(key),
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    fn describe(&self, key: Key) -> String {
        match key {
            Key::Name(sym) => format!("`{}`", self.symbols.name(sym)),
            Key::Const(idx) => match self.program.values.get(idx) {
                Some(Constant::Method { name, .. }) => match self.program.string(*name) {
                    Some(name) => format!("method `{}` (#{})", name, idx),
                    None => format!("method #{}", idx),
                },
                _ => format!("#{}", idx),
            },
        }
    }

    fn lookup(&self, key: Key) -> Result<Entry, LinkError> {
        self.entries
            .get(&key)
            .copied()
            .ok_or_else(|| LinkError::UnresolvedSymbol {
                symbol: self.describe(key),
            })
    }

    fn mismatch(&self, key: Key, expected: &'static str, found: Entry) -> LinkError {
        LinkError::SymbolKind {
            symbol: self.describe(key),
            expected,
            found: found.kind_name(),
        }
    }

    // ========================================
    // Constant access
    // ========================================

    fn constant(&self, index: usize, expected: &'static str) -> Result<&'a Constant, LinkError> {
        self.program
            .values
            .get(index)
            .ok_or(LinkError::BadConstant {
                index,
                expected,
                found: "nothing",
            })
    }

    fn string(&self, index: usize) -> Result<&'a str, LinkError> {
        match self.constant(index, "string")? {
            Constant::Str { value } => Ok(value.as_str()),
            other => Err(LinkError::BadConstant {
                index,
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }

    fn symbol(&mut self, index: usize) -> Result<Symbol, LinkError> {
        let name = self.string(index)?;
        Ok(self.symbols.intern(name))
    }

    fn format_string(&mut self, index: usize) -> Result<u64, LinkError> {
        if let Some(&slot) = self.string_slots.get(&index) {
            return Ok(slot as u64);
        }
        let value = self.string(index)?.to_string();
        self.strings.push(value);
        let slot = self.strings.len() - 1;
        self.string_slots.insert(index, slot);
        Ok(slot as u64)
    }

    // ========================================
    // Patches
    // ========================================

    fn write_patch_pointer(&mut self, key: Key, kind: PatchKind) {
        self.code.align(8);
        self.patches.push(Patch {
            kind,
            position: self.code.offset(),
            key,
        });
        self.code.write_u64(0);
    }

    fn write_patch_int(&mut self, key: Key, kind: PatchKind) {
        self.code.align(4);
        self.patches.push(Patch {
            kind,
            position: self.code.offset(),
            key,
        });
        self.code.write_u32(0);
    }

    // ========================================
    // Pass 1: methods
    // ========================================

    fn link_methods(&mut self) -> Result<(), LinkError> {
        let program = self.program;
        for (index, value) in program.values.iter().enumerate() {
            let Constant::Method {
                name,
                nargs,
                nlocals,
                code,
            } = value
            else {
                continue;
            };

            let offset = self.code.offset();
            debug!(
                "method #{} `{}` at {} ({} args, {} locals, {} instructions)",
                index,
                program.string(*name).unwrap_or("?"),
                offset,
                nargs,
                nlocals,
                code.len()
            );
            self.define(
                Key::Const(index),
                Entry::Method {
                    offset,
                    nargs: *nargs,
                },
            )?;
            self.method = index;
            self.frame_size = nargs.saturating_add(*nlocals);

            self.code.write_u8(Opcode::Frame as u8);
            self.code.write_u32(*nargs);
            self.code.write_u32(*nlocals);

            for ins in code {
                self.quicken(ins)?;
            }
        }
        Ok(())
    }

    fn quicken(&mut self, ins: &Ins) -> Result<(), LinkError> {
        trace!("{:>6}: {:?}", self.code.offset(), ins);
        match *ins {
            Ins::Label { name } => {
                let sym = self.symbol(name)?;
                let offset = self.code.offset();
                self.define(Key::Name(sym), Entry::Label(offset))?;
            }
            Ins::Lit { idx } => match self.constant(idx, "literal")? {
                Constant::Int { value } => {
                    self.code.write_u8(Opcode::Int as u8);
                    self.code.write_i32(*value);
                }
                Constant::Null => {
                    self.code.write_u8(Opcode::Null as u8);
                }
                other => {
                    return Err(LinkError::UnsupportedLiteral {
                        index: idx,
                        found: other.kind_name(),
                    });
                }
            },
            Ins::Printf { format, arity } => {
                let slot = self.format_string(format)?;
                self.code.write_u8(Opcode::Printf as u8);
                self.code.write_u32(arity);
                self.code.write_u64(slot);
            }
            Ins::Array => {
                self.code.write_u8(Opcode::Array as u8);
            }
            Ins::Object { class } => {
                self.code.write_u8(Opcode::Object as u8);
                self.write_patch_int(Key::Const(class), PatchKind::ClassArity);
                self.write_patch_int(Key::Const(class), PatchKind::ClassTag);
            }
            Ins::Slot { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::Slot as u8);
                self.code.write_u64(sym.0 as u64);
            }
            Ins::SetSlot { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::SetSlot as u8);
                self.code.write_u64(sym.0 as u64);
            }
            Ins::CallSlot { name, arity } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::CallSlot as u8);
                self.code.write_u32(arity);
                self.code.write_u64(sym.0 as u64);
            }
            Ins::Call { name, arity } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::Call as u8);
                self.code.write_u32(arity);
                self.write_patch_pointer(Key::Name(sym), PatchKind::Function { arity });
            }
            Ins::SetLocal { idx } => {
                self.check_local(idx)?;
                self.code.write_u8(Opcode::SetLocal as u8);
                self.code.write_u32(idx);
            }
            Ins::GetLocal { idx } => {
                self.check_local(idx)?;
                self.code.write_u8(Opcode::GetLocal as u8);
                self.code.write_u32(idx);
            }
            Ins::SetGlobal { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::SetGlobal as u8);
                self.write_patch_int(Key::Name(sym), PatchKind::Global);
            }
            Ins::GetGlobal { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::GetGlobal as u8);
                self.write_patch_int(Key::Name(sym), PatchKind::Global);
            }
            Ins::Branch { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::Branch as u8);
                self.write_patch_pointer(Key::Name(sym), PatchKind::Label);
            }
            Ins::Goto { name } => {
                let sym = self.symbol(name)?;
                self.code.write_u8(Opcode::Goto as u8);
                self.write_patch_pointer(Key::Name(sym), PatchKind::Label);
            }
            Ins::Return => {
                self.code.write_u8(Opcode::Return as u8);
            }
            Ins::Drop => {
                self.code.write_u8(Opcode::Drop as u8);
            }
        }
        Ok(())
    }

    fn check_local(&self, index: u32) -> Result<(), LinkError> {
        if index >= self.frame_size {
            return Err(LinkError::BadLocal {
                method: self.describe(Key::Const(self.method)),
                index,
                frame_size: self.frame_size,
            });
        }
        Ok(())
    }

    // ========================================
    // Pass 2: classes
    // ========================================

    fn link_classes(&mut self) -> Result<(), LinkError> {
        let program = self.program;
        for (index, value) in program.values.iter().enumerate() {
            let Constant::Class { slots } = value else {
                continue;
            };

            let mut decls = Vec::with_capacity(slots.len());
            for &slot in slots {
                let decl = match self.constant(slot, "slot or method")? {
                    Constant::Slot { name } => SlotDecl::Var(self.symbol(*name)?),
                    Constant::Method { name, .. } => {
                        let sym = self.symbol(*name)?;
                        match self.lookup(Key::Const(slot))? {
                            Entry::Method { offset, .. } => SlotDecl::Method(sym, offset),
                            other => return Err(self.mismatch(Key::Const(slot), "method", other)),
                        }
                    }
                    other => {
                        return Err(LinkError::BadConstant {
                            index: slot,
                            expected: "slot or method",
                            found: other.kind_name(),
                        });
                    }
                };
                decls.push(decl);
            }

            let class = CClass::new(decls);
            debug!(
                "class #{}: {} vars, {} slots",
                index, class.nvars, class.nslots
            );
            let class_index = self.classes.push(class);
            self.define(Key::Const(index), Entry::Class(class_index))?;
        }
        Ok(())
    }

    // ========================================
    // Pass 3: globals and patches
    // ========================================

    fn link_globals(&mut self) -> Result<(), LinkError> {
        let program = self.program;
        for &index in &program.slots {
            match self.constant(index, "method or slot")? {
                Constant::Method { name, .. } => {
                    let entry = self.lookup(Key::Const(index))?;
                    let sym = self.symbol(*name)?;
                    self.define(Key::Name(sym), entry)?;
                }
                Constant::Slot { name } => {
                    let sym = self.symbol(*name)?;
                    self.globals.push(sym);
                }
                other => {
                    return Err(LinkError::BadGlobal {
                        index,
                        found: other.kind_name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_patches(&mut self) -> Result<(), LinkError> {
        let patches = std::mem::take(&mut self.patches);
        for patch in &patches {
            match patch.kind {
                PatchKind::Function { arity } => match self.lookup(patch.key)? {
                    Entry::Method { nargs, .. } if nargs != arity => {
                        return Err(LinkError::CallArity {
                            symbol: self.describe(patch.key),
                            expected: nargs,
                            got: arity,
                        });
                    }
                    Entry::Method { offset, .. } => {
                        self.code.patch_u64(patch.position, offset as u64)
                    }
                    other => return Err(self.mismatch(patch.key, "function", other)),
                },
                PatchKind::Label => match self.lookup(patch.key)? {
                    Entry::Label(offset) => self.code.patch_u64(patch.position, offset as u64),
                    other => return Err(self.mismatch(patch.key, "label", other)),
                },
                PatchKind::Global => {
                    let Key::Name(sym) = patch.key else {
                        unreachable!("global patches are keyed by name");
                    };
                    let slot = self
                        .globals
                        .iter()
                        .position(|&g| g == sym)
                        .ok_or_else(|| LinkError::UnresolvedSymbol {
                            symbol: format!("global {}", self.describe(patch.key)),
                        })?;
                    self.code.patch_u32(patch.position, slot as u32);
                }
                PatchKind::ClassArity => match self.lookup(patch.key)? {
                    Entry::Class(class) => {
                        let nvars = self.classes.nvars(class);
                        self.code.patch_u32(patch.position, nvars as u32);
                    }
                    other => return Err(self.mismatch(patch.key, "class", other)),
                },
                PatchKind::ClassTag => match self.lookup(patch.key)? {
                    Entry::Class(class) => self.code.patch_u32(patch.position, class as u32),
                    other => return Err(self.mismatch(patch.key, "class", other)),
                },
            }
        }
        debug!("resolved {} patches", patches.len());
        Ok(())
    }
}

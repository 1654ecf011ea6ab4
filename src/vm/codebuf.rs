//! Code buffer for quickened bytecode.
//!
//! Operands are written at their natural alignment so the interpreter can
//! decode every field with a single aligned read.

/// Initial capacity in bytes.
const INITIAL_CAPACITY: usize = 4096;

/// An append-only buffer of quickened code.
#[derive(Debug, Clone)]
pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    /// Create a new empty code buffer.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a new code buffer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    /// Get the current size of the code.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get the current write offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Make room for `additional` bytes, doubling capacity when full.
    fn reserve(&mut self, additional: usize) {
        let needed = self.code.len() + additional;
        if needed > self.code.capacity() {
            let new_cap = (self.code.capacity() * 2).max(needed).max(INITIAL_CAPACITY);
            self.code.reserve_exact(new_cap - self.code.len());
        }
    }

    /// Pad with zeros up to the given power-of-two boundary.
    pub fn align(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let current = self.code.len();
        let aligned = align_up(current, alignment);
        self.reserve(aligned - current);
        self.code.resize(aligned, 0);
    }

    /// Emit a single byte.
    pub fn write_u8(&mut self, byte: u8) {
        self.reserve(1);
        self.code.push(byte);
    }

    /// Emit a 16-bit value at 2-byte alignment.
    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        self.reserve(2);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit value at 4-byte alignment.
    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        self.reserve(4);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a signed 32-bit value at 4-byte alignment.
    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    /// Emit a pointer-width value at 8-byte alignment.
    pub fn write_u64(&mut self, value: u64) {
        self.align(8);
        self.reserve(8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Overwrite a previously written 32-bit field.
    pub fn patch_u32(&mut self, pos: usize, value: u32) {
        debug_assert_eq!(pos % 4, 0, "misaligned u32 patch at {pos}");
        self.code[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite a previously written pointer-width field.
    pub fn patch_u64(&mut self, pos: usize, value: u64) {
        debug_assert_eq!(pos % 8, 0, "misaligned u64 patch at {pos}");
        self.code[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Get the code bytes (for inspection).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Read a byte at `*ip` and advance.
    #[inline]
    pub fn read_u8(&self, ip: &mut usize) -> Option<u8> {
        let byte = *self.code.get(*ip)?;
        *ip += 1;
        Some(byte)
    }

    /// Align `*ip` to 4, read a 32-bit value and advance.
    #[inline]
    pub fn read_u32(&self, ip: &mut usize) -> Option<u32> {
        let pos = align_up(*ip, 4);
        let bytes: [u8; 4] = self.code.get(pos..pos + 4)?.try_into().ok()?;
        *ip = pos + 4;
        Some(u32::from_le_bytes(bytes))
    }

    /// Align `*ip` to 4, read a signed 32-bit value and advance.
    #[inline]
    pub fn read_i32(&self, ip: &mut usize) -> Option<i32> {
        self.read_u32(ip).map(|v| v as i32)
    }

    /// Align `*ip` to 8, read a pointer-width value and advance.
    #[inline]
    pub fn read_u64(&self, ip: &mut usize) -> Option<u64> {
        let pos = align_up(*ip, 8);
        let bytes: [u8; 8] = self.code.get(pos..pos + 8)?.try_into().ok()?;
        *ip = pos + 8;
        Some(u64::from_le_bytes(bytes))
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_aligned() {
        let mut buf = CodeBuffer::new();
        buf.write_u8(0x90);
        buf.write_u16(0x1234);
        buf.write_u32(0xDEADBEEF);

        assert_eq!(buf.len(), 8);
        assert_eq!(buf.code(), &[0x90, 0x00, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_pointer_fields_are_naturally_aligned() {
        let mut buf = CodeBuffer::new();
        buf.write_u8(1);
        buf.write_u32(7);
        buf.write_u64(0xAABB);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf.code()[8..16], &0xAABBu64.to_le_bytes());
    }

    #[test]
    fn test_alignment() {
        let mut buf = CodeBuffer::new();
        buf.write_u8(0x90);
        buf.align(4);

        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut buf = CodeBuffer::with_capacity(4);
        for i in 0..1000u32 {
            buf.write_u32(i);
        }
        let mut ip = 0;
        for i in 0..1000u32 {
            assert_eq!(buf.read_u32(&mut ip), Some(i));
        }
        assert_eq!(ip, buf.len());
    }

    #[test]
    fn test_patch_in_place() {
        let mut buf = CodeBuffer::new();
        buf.write_u8(3);
        buf.write_u64(0);
        let pos = buf.len() - 8;
        buf.write_u8(4);
        buf.patch_u64(pos, 99);

        let mut ip = 0;
        assert_eq!(buf.read_u8(&mut ip), Some(3));
        assert_eq!(buf.read_u64(&mut ip), Some(99));
        assert_eq!(buf.read_u8(&mut ip), Some(4));
    }

    #[test]
    fn test_read_past_end() {
        let buf = CodeBuffer::new();
        let mut ip = 0;
        assert_eq!(buf.read_u8(&mut ip), None);
        assert_eq!(buf.read_u64(&mut ip), None);
    }
}

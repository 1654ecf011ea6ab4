use std::fmt;

/// A 64-bit tagged value.
///
/// The three low bits select the kind:
/// - `000`: immediate integer, payload stored shifted left by 3
/// - `001`: heap reference, the remaining bits are an 8-byte aligned address
/// - `010`: null
///
/// Integers and null never touch the heap.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

pub const TAG_MASK: u64 = 0b111;
pub const INT_TAG: u64 = 0b000;
pub const OBJ_TAG: u64 = 0b001;
pub const NULL_TAG: u64 = 0b010;

/// Runtime kind of a value, as read from its low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Null,
    Object,
}

impl Value {
    /// `make_int(i) = i << 3`. Bits shifted out of the top are lost, so the
    /// representable range is 61 bits.
    #[inline]
    pub fn int(value: i64) -> Self {
        Self((value as u64) << 3)
    }

    #[inline]
    pub fn null() -> Self {
        Self(NULL_TAG)
    }

    /// Tag an 8-byte aligned heap address as a reference.
    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        debug_assert_eq!(
            addr as u64 & TAG_MASK,
            0,
            "heap address must be 8-byte aligned"
        );
        Self(addr as u64 | OBJ_TAG)
    }

    /// Reinterpret a raw word. Used for frame headers, which hold plain
    /// offsets rather than tagged values.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// `classify(v) = v & 7`.
    #[inline]
    pub fn kind(self) -> ValueKind {
        match self.0 & TAG_MASK {
            INT_TAG => ValueKind::Int,
            OBJ_TAG => ValueKind::Object,
            NULL_TAG => ValueKind::Null,
            other => unreachable!("invalid value tag {other:#b} in {:#x}", self.0),
        }
    }

    #[inline]
    pub fn is_int(self) -> bool {
        self.0 & TAG_MASK == INT_TAG
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == NULL_TAG
    }

    #[inline]
    pub fn is_object(self) -> bool {
        self.0 & TAG_MASK == OBJ_TAG
    }

    /// Everything but null is true.
    #[inline]
    pub fn is_truthy(self) -> bool {
        !self.is_null()
    }

    /// `get_int(v) = v >> 3`, arithmetic so negative integers round-trip.
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        if self.is_int() {
            Some((self.0 as i64) >> 3)
        } else {
            None
        }
    }

    /// `untag_obj(v) = v & !1`.
    #[inline]
    pub fn addr(self) -> Option<usize> {
        if self.is_object() {
            Some((self.0 & !OBJ_TAG) as usize)
        } else {
            None
        }
    }

    /// Get the type name of this value.
    pub fn type_name(self) -> &'static str {
        match self.kind() {
            ValueKind::Int => "int",
            ValueKind::Null => "null",
            ValueKind::Object => "object",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 & TAG_MASK {
            INT_TAG => write!(f, "Int({})", (self.0 as i64) >> 3),
            NULL_TAG if self.0 == NULL_TAG => write!(f, "Null"),
            OBJ_TAG => write!(f, "Ref({:#x})", self.0 & !OBJ_TAG),
            _ => write!(f, "Raw({:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        for n in [0, 1, 7, 42, -1, -8, -12345, i32::MAX as i64, i32::MIN as i64] {
            let v = Value::int(n);
            assert_eq!(v.kind(), ValueKind::Int);
            assert_eq!(v.as_int(), Some(n));
        }
    }

    #[test]
    fn test_int_encoding_is_shifted() {
        assert_eq!(Value::int(3).raw(), 24);
        assert_eq!(Value::int(0).raw(), 0);
    }

    #[test]
    fn test_null_distinct_from_zero() {
        assert_ne!(Value::null(), Value::int(0));
        assert_eq!(Value::null().kind(), ValueKind::Null);
        assert!(Value::null().as_int().is_none());
        assert!(!Value::null().is_truthy());
        assert!(Value::int(0).is_truthy());
    }

    #[test]
    fn test_object_tagging() {
        let v = Value::from_addr(0x1000);
        assert_eq!(v.kind(), ValueKind::Object);
        assert_eq!(v.addr(), Some(0x1000));
        assert_eq!(v.raw() & TAG_MASK, OBJ_TAG);
        assert!(v.as_int().is_none());
    }

    #[test]
    fn test_kinds_are_exclusive() {
        let values = [Value::int(-7), Value::null(), Value::from_addr(64)];
        for v in values {
            let flags = [v.is_int(), v.is_null(), v.is_object()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{:?}", v);
        }
    }
}

/// Quickened opcodes.
///
/// Each instruction is a one-byte opcode followed by its payload; see the
/// table on [`Opcode`] variants for the operand layout. 4-byte operands sit at
/// 4-byte alignment and 8-byte operands at 8-byte alignment.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // ========================================
    // Constants
    // ========================================
    /// `i32` literal
    Int = 0,
    Null,

    // ========================================
    // Output
    // ========================================
    /// `u32` arity, `u64` format string index
    Printf,

    // ========================================
    // Allocation
    // ========================================
    Array,
    /// `u32` class nvars, `u32` class index
    Object,

    // ========================================
    // Slots
    // ========================================
    /// `u64` name symbol
    Slot,
    /// `u64` name symbol
    SetSlot,
    /// `u32` arity, `u64` name symbol
    CallSlot,

    // ========================================
    // Calls
    // ========================================
    /// `u32` arity, `u64` code offset
    Call,
    /// `u32` nargs, `u32` nlocals
    Frame,
    Return,

    // ========================================
    // Variables
    // ========================================
    /// `u32` frame-relative index
    GetLocal,
    /// `u32` frame-relative index
    SetLocal,
    /// `u32` global slot index
    GetGlobal,
    /// `u32` global slot index
    SetGlobal,

    // ========================================
    // Control Flow
    // ========================================
    /// `u64` code offset
    Branch,
    /// `u64` code offset
    Goto,

    // ========================================
    // Stack Manipulation
    // ========================================
    Drop,
}

impl Opcode {
    const ALL: [Opcode; 18] = [
        Opcode::Int,
        Opcode::Null,
        Opcode::Printf,
        Opcode::Array,
        Opcode::Object,
        Opcode::Slot,
        Opcode::SetSlot,
        Opcode::CallSlot,
        Opcode::Call,
        Opcode::Frame,
        Opcode::Return,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::Branch,
        Opcode::Goto,
        Opcode::Drop,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Int => "INT",
            Opcode::Null => "NULL",
            Opcode::Printf => "PRINTF",
            Opcode::Array => "ARRAY",
            Opcode::Object => "OBJECT",
            Opcode::Slot => "SLOT",
            Opcode::SetSlot => "SET_SLOT",
            Opcode::CallSlot => "CALL_SLOT",
            Opcode::Call => "CALL",
            Opcode::Frame => "FRAME",
            Opcode::Return => "RETURN",
            Opcode::GetLocal => "GET_LOCAL",
            Opcode::SetLocal => "SET_LOCAL",
            Opcode::GetGlobal => "GET_GLOBAL",
            Opcode::SetGlobal => "SET_GLOBAL",
            Opcode::Branch => "BRANCH",
            Opcode::Goto => "GOTO",
            Opcode::Drop => "DROP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_byte(200), None);
    }
}

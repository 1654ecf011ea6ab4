//! Built-in methods of integers and arrays.

use super::class::{Symbol, Symbols};
use super::value::Value;
use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl IntOp {
    pub const ARITY: usize = 2;

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "add" => IntOp::Add,
            "sub" => IntOp::Sub,
            "mul" => IntOp::Mul,
            "div" => IntOp::Div,
            "mod" => IntOp::Mod,
            "lt" => IntOp::Lt,
            "le" => IntOp::Le,
            "gt" => IntOp::Gt,
            "ge" => IntOp::Ge,
            "eq" => IntOp::Eq,
            _ => return None,
        })
    }

    /// Apply to two integers. Comparisons yield `1` for true and null for
    /// false.
    pub fn apply(self, a: i64, b: i64) -> Result<Value, RuntimeError> {
        let flag = |cond: bool| if cond { Value::int(1) } else { Value::null() };
        Ok(match self {
            IntOp::Add => Value::int(a.wrapping_add(b)),
            IntOp::Sub => Value::int(a.wrapping_sub(b)),
            IntOp::Mul => Value::int(a.wrapping_mul(b)),
            IntOp::Div if b == 0 => return Err(RuntimeError::DivisionByZero),
            IntOp::Div => Value::int(a.wrapping_div(b)),
            IntOp::Mod if b == 0 => return Err(RuntimeError::DivisionByZero),
            IntOp::Mod => Value::int(a.wrapping_rem(b)),
            IntOp::Lt => flag(a < b),
            IntOp::Le => flag(a <= b),
            IntOp::Gt => flag(a > b),
            IntOp::Ge => flag(a >= b),
            IntOp::Eq => flag(a == b),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    Get,
    Set,
    Length,
}

impl ArrayOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get" => Some(ArrayOp::Get),
            "set" => Some(ArrayOp::Set),
            "length" => Some(ArrayOp::Length),
            _ => None,
        }
    }

    /// Arity including the receiver.
    pub fn arity(self) -> usize {
        match self {
            ArrayOp::Get => 2,
            ArrayOp::Set => 3,
            ArrayOp::Length => 1,
        }
    }
}

/// Built-in dispatch resolved once per linked image, indexed by symbol.
#[derive(Debug, Default)]
pub struct Builtins {
    int_ops: Vec<Option<IntOp>>,
    array_ops: Vec<Option<ArrayOp>>,
}

impl Builtins {
    pub fn new(symbols: &Symbols) -> Self {
        let mut builtins = Self {
            int_ops: vec![None; symbols.len()],
            array_ops: vec![None; symbols.len()],
        };
        for (sym, name) in symbols.iter() {
            builtins.int_ops[sym.0 as usize] = IntOp::from_name(name);
            builtins.array_ops[sym.0 as usize] = ArrayOp::from_name(name);
        }
        builtins
    }

    pub fn int_op(&self, name: Symbol) -> Option<IntOp> {
        self.int_ops.get(name.0 as usize).copied().flatten()
    }

    pub fn array_op(&self, name: Symbol) -> Option<ArrayOp> {
        self.array_ops.get(name.0 as usize).copied().flatten()
    }
}

/// Check an array index against its length.
pub fn check_index(index: i64, length: usize) -> Result<usize, RuntimeError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < length)
        .ok_or(RuntimeError::IndexOutOfBounds { index, length })
}

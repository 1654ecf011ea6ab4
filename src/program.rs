//! The program model handed to the VM by the bytecode compiler.
//!
//! A program is a constant pool plus the indices of its top-level global
//! slots and its entry method. Instructions and constants refer to each other
//! only through constant-pool indices.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// A constant-pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Constant {
    Int { value: i32 },
    Null,
    Str { value: String },
    Method {
        /// Index of the method's name string.
        name: usize,
        nargs: u32,
        nlocals: u32,
        code: Vec<Ins>,
    },
    Slot {
        /// Index of the slot's name string.
        name: usize,
    },
    Class {
        /// Indices of `Slot` and `Method` constants, in declaration order.
        slots: Vec<usize>,
    },
}

impl Constant {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Int { .. } => "int",
            Constant::Null => "null",
            Constant::Str { .. } => "string",
            Constant::Method { .. } => "method",
            Constant::Slot { .. } => "slot",
            Constant::Class { .. } => "class",
        }
    }
}

/// A source instruction, before quickening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Ins {
    Label { name: usize },
    Lit { idx: usize },
    Printf { format: usize, arity: u32 },
    Array,
    Object { class: usize },
    Slot { name: usize },
    SetSlot { name: usize },
    CallSlot { name: usize, arity: u32 },
    Call { name: usize, arity: u32 },
    SetLocal { idx: u32 },
    GetLocal { idx: u32 },
    SetGlobal { name: usize },
    GetGlobal { name: usize },
    Branch { name: usize },
    Goto { name: usize },
    Return,
    Drop,
}

/// A whole compiled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub values: Vec<Constant>,
    /// Constant indices of the top-level global slots and functions.
    pub slots: Vec<usize>,
    /// Constant index of the entry method.
    pub entry: usize,
}

impl Program {
    pub fn from_json(source: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a program from a JSON file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&source)
    }

    /// The string stored at `idx`, if that constant is a string.
    pub fn string(&self, idx: usize) -> Option<&str> {
        match self.values.get(idx) {
            Some(Constant::Str { value }) => Some(value),
            _ => None,
        }
    }
}

/// Incrementally assembles a [`Program`].
///
/// Strings and integers are interned so repeated names share one pool slot.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    values: Vec<Constant>,
    slots: Vec<usize>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, constant: Constant) -> usize {
        self.values.push(constant);
        self.values.len() - 1
    }

    fn intern(&mut self, constant: Constant) -> usize {
        if let Some(idx) = self.values.iter().position(|c| *c == constant) {
            return idx;
        }
        self.push(constant)
    }

    pub fn string(&mut self, value: &str) -> usize {
        self.intern(Constant::Str {
            value: value.to_string(),
        })
    }

    pub fn int(&mut self, value: i32) -> usize {
        self.intern(Constant::Int { value })
    }

    pub fn null(&mut self) -> usize {
        self.intern(Constant::Null)
    }

    pub fn method(&mut self, name: &str, nargs: u32, nlocals: u32, code: Vec<Ins>) -> usize {
        let name = self.string(name);
        self.push(Constant::Method {
            name,
            nargs,
            nlocals,
            code,
        })
    }

    pub fn slot(&mut self, name: &str) -> usize {
        let name = self.string(name);
        self.push(Constant::Slot { name })
    }

    pub fn class(&mut self, slots: Vec<usize>) -> usize {
        self.push(Constant::Class { slots })
    }

    /// Declare a top-level global: a function constant or a variable slot.
    pub fn global(&mut self, idx: usize) {
        self.slots.push(idx);
    }

    pub fn finish(self, entry: usize) -> Program {
        Program {
            values: self.values,
            slots: self.slots,
            entry,
        }
    }
}

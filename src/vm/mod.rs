mod builtins;
mod class;
mod codebuf;
mod frame;
mod heap;
mod link;
mod ops;
mod value;
mod vm;

pub use class::{CClass, CSlot, ClassTable, SlotDecl, SlotKind, Symbol, Symbols};
pub use codebuf::CodeBuffer;
pub use frame::FrameStack;
pub use heap::{GcStats, Heap, Roots, Shape};
pub use link::{Image, link};
pub use ops::Opcode;
pub use value::{Value, ValueKind};
pub use vm::VM;

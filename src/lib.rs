//! Kiln - a quickening bytecode VM for a small object language
//!
//! Programs arrive as a constant pool of methods, classes, slots and literals
//! (usually as JSON from an external compiler). The VM links them into one
//! flat buffer of quickened code and interprets it over a semispace copying
//! heap.

pub mod config;
pub mod error;
pub mod program;
pub mod vm;

pub use config::RuntimeConfig;
pub use error::{ConfigError, LinkError, LoadError, RuntimeError, VmError};
pub use program::{Constant, Ins, Program, ProgramBuilder};
pub use vm::{Image, VM, Value, link};

/// Link and run `program` with stdout as its output.
pub fn run(program: &Program, config: &RuntimeConfig) -> Result<(), VmError> {
    VM::new(config)?.run(program)
}

//! Error types for loading, linking and running programs.

use thiserror::Error;

/// Errors reading a program from disk or JSON.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed program: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while quickening a program.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link error: unresolved symbol {symbol}")]
    UnresolvedSymbol { symbol: String },

    #[error("link error: symbol {symbol} is a {found}, expected a {expected}")]
    SymbolKind {
        symbol: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("link error: symbol {symbol} defined twice")]
    DuplicateSymbol { symbol: String },

    #[error("link error: literal #{index} is a {found}, only int and null can be quickened")]
    UnsupportedLiteral { index: usize, found: &'static str },

    #[error("link error: constant #{index} should be a {expected}, found {found}")]
    BadConstant {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("link error: global #{index} is a {found}, expected a method or slot")]
    BadGlobal { index: usize, found: &'static str },

    #[error("link error: entry point #{index} is not a method")]
    BadEntry { index: usize },

    #[error("link error: {method} uses local {index}, but its frame has {frame_size} slots")]
    BadLocal {
        method: String,
        index: u32,
        frame_size: u32,
    },

    #[error("link error: call to {symbol} passes {got} arguments, it takes {expected}")]
    CallArity {
        symbol: String,
        expected: u32,
        got: u32,
    },
}

/// Fatal errors raised by the running program.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime error: cannot use slot `{name}` of null")]
    NullReceiver { name: String },

    #[error("runtime error: no built-in `{name}` for {receiver}")]
    UnknownBuiltin {
        name: String,
        receiver: &'static str,
    },

    #[error("runtime error: built-in `{name}` takes {expected} arguments, got {got}")]
    BuiltinArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("runtime error: no slot named `{name}`")]
    SlotNotFound { name: String },

    #[error("runtime error: slot `{name}` is not a method")]
    NotAMethod { name: String },

    #[error("runtime error: slot `{name}` is a method, not a variable")]
    NotAVariable { name: String },

    #[error("runtime error: {context}: expected {expected}, got {got}")]
    TypeMismatch {
        context: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("runtime error: division by zero")]
    DivisionByZero,

    #[error("runtime error: index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("runtime error: format string needs more than {given} arguments")]
    FormatArity { given: usize },

    #[error("runtime error: out of memory (requested {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("runtime error: bad opcode {byte:#04x} at offset {offset}")]
    BadOpcode { byte: u8, offset: usize },

    #[error("runtime error: execution ran past the end of code at offset {offset}")]
    CodeOverrun { offset: usize },

    #[error("runtime error: operand stack underflow")]
    StackUnderflow,

    #[error("runtime error: output failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reading a runtime configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: heap size {size} does not fit in memory")]
    HeapSize { size: usize },
}

/// Anything that can stop [`crate::run`].
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

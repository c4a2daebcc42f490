use regoth_formats::{DecodeError, ImageError};
use thiserror::Error;

use crate::symbol::SymbolIndex;

/// Failures while loading or querying a symbol table.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("corrupt script image: {0}")]
    CorruptImage(String),
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
}

impl From<ImageError> for ScriptError {
    fn from(err: ImageError) -> Self {
        ScriptError::CorruptImage(err.to_string())
    }
}

/// Runtime failures of a single VM invocation chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("call depth exceeded {limit} frames")]
    StackOverflow { limit: usize },
    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error(transparent)]
    InvalidOpcode(#[from] DecodeError),
    #[error("type mismatch at offset {offset}: {detail}")]
    TypeMismatch { offset: usize, detail: String },
    #[error("external `{name}` has no registered trap")]
    UnresolvedExternal { name: String },
    #[error("symbol {0} is not callable")]
    NotAFunction(SymbolIndex),
    #[error("`{name}` expects {expected} arguments, got {given}")]
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error("member access at offset {offset} without a bound instance")]
    NoInstance { offset: usize },
    #[error("symbol {symbol} element {element} out of range")]
    IndexOutOfRange { symbol: SymbolIndex, element: usize },
    #[error("symbol #{0} does not exist")]
    BadSymbol(u32),
    #[error("trap `{name}` failed: {source}")]
    Trap {
        name: String,
        #[source]
        source: TrapError,
    },
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),
}

/// Error surfaced by a native trap implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrapError {
    #[error("argument {index} should be {expected}")]
    BadArgument { index: usize, expected: &'static str },
    #[error("no such actor")]
    NoSuchActor,
    #[error("{0}")]
    Failed(String),
}

use regoth_script::{ScriptError, VmError};
use thiserror::Error;

use crate::world::ActorHandle;

/// Failures of world-level operations that callers may want to react to.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("{name} is not an instance symbol")]
    NotAnInstance { name: String },
    #[error("{name} is not a function")]
    NotAFunction { name: String },
    #[error("actor {0} does not exist")]
    NoSuchActor(ActorHandle),
    #[error("script call {function} failed: {source}")]
    Vm {
        function: String,
        #[source]
        source: VmError,
    },
}

/// Failures of savegame import.
#[derive(Debug, Error, PartialEq)]
pub enum SerializeError {
    #[error("malformed world document: {0}")]
    MalformedDocument(String),
    #[error("unknown symbol name `{0}` in world document")]
    UnknownSymbolName(String),
    #[error("the destination world has no player to merge into")]
    NoPlayer,
}

impl From<serde_json::Error> for SerializeError {
    fn from(err: serde_json::Error) -> Self {
        SerializeError::MalformedDocument(err.to_string())
    }
}

pub mod error;
pub mod external;
pub mod instance;
pub mod symbol;
pub mod value;
pub mod vm;

pub use error::{ScriptError, TrapError, VmError};
pub use external::{External, ExternalTable, ScriptHost, Signature, TrapContext};
pub use instance::{GlobalStore, Instance};
pub use symbol::{Symbol, SymbolIndex, SymbolTable};
pub use value::{InstanceRef, SlotValues, SlotWriteError, Value, ValueType};
pub use vm::{CallFrame, Vm, VmLimits, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STEPS};

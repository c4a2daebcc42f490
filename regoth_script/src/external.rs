use std::collections::HashMap;
use std::fmt;

use crate::error::TrapError;
use crate::instance::{GlobalStore, Instance};
use crate::symbol::{SymbolIndex, SymbolTable};
use crate::value::{InstanceRef, Value, ValueType};

/// What the VM needs from whoever owns the instances it runs against.
pub trait ScriptHost {
    fn instance(&self, reference: InstanceRef) -> Option<&Instance>;

    fn instance_mut(&mut self, reference: InstanceRef) -> Option<&mut Instance>;

    /// Live instance created from the instance symbol `symbol`, if any.
    fn resolve_instance_symbol(&self, _symbol: SymbolIndex) -> Option<InstanceRef> {
        None
    }
}

/// Ordered argument types and optional return type of a native trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub returns: Option<ValueType>,
}

impl Signature {
    pub fn new(params: &[ValueType], returns: Option<ValueType>) -> Self {
        Signature {
            params: params.to_vec(),
            returns,
        }
    }
}

/// Everything a trap may touch during one invocation.
pub struct TrapContext<'a, H> {
    pub host: &'a mut H,
    pub globals: &'a mut GlobalStore,
    pub symbols: &'a SymbolTable,
    pub args: &'a [Value],
    /// Instance bound by the calling frame.
    pub instance: Option<InstanceRef>,
}

impl<H> TrapContext<'_, H> {
    pub fn int(&self, index: usize) -> Result<i32, TrapError> {
        self.args
            .get(index)
            .and_then(Value::as_int)
            .ok_or(TrapError::BadArgument {
                index,
                expected: "int",
            })
    }

    pub fn float(&self, index: usize) -> Result<f32, TrapError> {
        self.args
            .get(index)
            .and_then(Value::as_float)
            .ok_or(TrapError::BadArgument {
                index,
                expected: "float",
            })
    }

    pub fn str(&self, index: usize) -> Result<&str, TrapError> {
        self.args
            .get(index)
            .and_then(Value::as_str)
            .ok_or(TrapError::BadArgument {
                index,
                expected: "string",
            })
    }

    /// An instance argument; null references are reported as `None`.
    pub fn instance_arg(&self, index: usize) -> Result<Option<InstanceRef>, TrapError> {
        match self.args.get(index) {
            Some(Value::Instance(reference)) => Ok(*reference),
            _ => Err(TrapError::BadArgument {
                index,
                expected: "instance",
            }),
        }
    }

    /// Like [`instance_arg`](Self::instance_arg) but a null reference is an error.
    pub fn live_instance(&self, index: usize) -> Result<InstanceRef, TrapError> {
        self.instance_arg(index)?.ok_or(TrapError::NoSuchActor)
    }
}

pub type TrapFn<H> = dyn Fn(&mut TrapContext<'_, H>) -> Result<Value, TrapError>;

pub struct External<H> {
    pub name: String,
    pub signature: Signature,
    pub function: Box<TrapFn<H>>,
}

/// Native capabilities the VM may invoke, registered by name at engine start.
pub struct ExternalTable<H> {
    entries: Vec<External<H>>,
    by_name: HashMap<String, usize>,
}

impl<H> Default for ExternalTable<H> {
    fn default() -> Self {
        ExternalTable {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<H> fmt::Debug for ExternalTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| &entry.name))
            .finish()
    }
}

impl<H> ExternalTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the trap for `name`; names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, signature: Signature, function: F)
    where
        F: Fn(&mut TrapContext<'_, H>) -> Result<Value, TrapError> + 'static,
    {
        let key = name.to_ascii_uppercase();
        let entry = External {
            name: key.clone(),
            signature,
            function: Box::new(function),
        };
        match self.by_name.get(&key) {
            Some(slot) => self.entries[*slot] = entry,
            None => {
                self.by_name.insert(key, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&External<H>> {
        self.entries.get(slot)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

use std::fmt;

use regoth_formats::{SlotData, SlotType};
use serde::{Deserialize, Serialize};

/// Opaque reference to a live VM instance. The host decides what it points at
/// (the engine uses actor handles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Float,
    Str,
    Instance,
}

impl ValueType {
    pub fn from_slot_type(slot_type: SlotType) -> Option<Self> {
        match slot_type {
            SlotType::None => None,
            SlotType::Int => Some(ValueType::Int),
            SlotType::Float => Some(ValueType::Float),
            SlotType::String => Some(ValueType::Str),
            SlotType::Instance => Some(ValueType::Instance),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "string",
            ValueType::Instance => "instance",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    Instance(Option<InstanceRef>),
}

impl Default for Value {
    /// The neutral value handed back when a call fails.
    fn default() -> Self {
        Value::Int(0)
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Instance(_) => ValueType::Instance,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<InstanceRef> {
        match self {
            Value::Instance(reference) => *reference,
            _ => None,
        }
    }

    /// String form used by `Concat`; `None` for instances, which never stringify.
    pub fn stringify(&self) -> Option<String> {
        match self {
            Value::Int(value) => Some(value.to_string()),
            Value::Float(value) => Some(value.to_string()),
            Value::Str(value) => Some(value.clone()),
            Value::Instance(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "\"{value}\""),
            Value::Instance(Some(reference)) => write!(f, "instance({})", reference.0),
            Value::Instance(None) => write!(f, "instance(null)"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<InstanceRef> for Value {
    fn from(value: InstanceRef) -> Self {
        Value::Instance(Some(value))
    }
}

/// Mutable, typed value slots of fixed arity.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValues {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(Vec<String>),
    Instance(Vec<Option<InstanceRef>>),
}

impl SlotValues {
    /// Runtime slots from a symbol's declared values. `None` declares no storage.
    pub fn from_declared(data: &SlotData) -> Option<Self> {
        match data {
            SlotData::None => None,
            SlotData::Int(values) => Some(SlotValues::Int(values.clone())),
            SlotData::Float(values) => Some(SlotValues::Float(values.clone())),
            SlotData::String(values) => Some(SlotValues::Str(values.clone())),
            SlotData::Instance(count) => Some(SlotValues::Instance(vec![None; *count as usize])),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            SlotValues::Int(_) => ValueType::Int,
            SlotValues::Float(_) => ValueType::Float,
            SlotValues::Str(_) => ValueType::Str,
            SlotValues::Instance(_) => ValueType::Instance,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SlotValues::Int(values) => values.len(),
            SlotValues::Float(values) => values.len(),
            SlotValues::Str(values) => values.len(),
            SlotValues::Instance(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, element: usize) -> Option<Value> {
        match self {
            SlotValues::Int(values) => values.get(element).map(|v| Value::Int(*v)),
            SlotValues::Float(values) => values.get(element).map(|v| Value::Float(*v)),
            SlotValues::Str(values) => values.get(element).map(|v| Value::Str(v.clone())),
            SlotValues::Instance(values) => values.get(element).map(|v| Value::Instance(*v)),
        }
    }

    /// Store `value` at `element`. Fails with the slot's type name when the
    /// value has a different type, or `None` when out of range.
    pub fn set(&mut self, element: usize, value: Value) -> Result<(), SlotWriteError> {
        let len = self.len();
        if element >= len {
            return Err(SlotWriteError::OutOfRange);
        }
        match (self, value) {
            (SlotValues::Int(values), Value::Int(v)) => values[element] = v,
            (SlotValues::Float(values), Value::Float(v)) => values[element] = v,
            (SlotValues::Str(values), Value::Str(v)) => values[element] = v,
            (SlotValues::Instance(values), Value::Instance(v)) => values[element] = v,
            (slots, _) => return Err(SlotWriteError::Type(slots.value_type())),
        }
        Ok(())
    }

    /// Copy as many elements as both sides hold; types must match.
    pub fn overwrite_prefix(&mut self, other: &SlotValues) -> bool {
        fn copy<T: Clone>(dst: &mut [T], src: &[T]) {
            let n = dst.len().min(src.len());
            dst[..n].clone_from_slice(&src[..n]);
        }
        match (self, other) {
            (SlotValues::Int(dst), SlotValues::Int(src)) => copy(dst, src),
            (SlotValues::Float(dst), SlotValues::Float(src)) => copy(dst, src),
            (SlotValues::Str(dst), SlotValues::Str(src)) => copy(dst, src),
            (SlotValues::Instance(dst), SlotValues::Instance(src)) => copy(dst, src),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWriteError {
    OutOfRange,
    Type(ValueType),
}

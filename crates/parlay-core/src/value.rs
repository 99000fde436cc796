//! Argument and result values exchanged with tasks.
//!
//! `Value` is the sum type every task argument and result is made of. Plain
//! data holders are modelled as [`Record`]s whose attributes are explicitly
//! enumerable, so argument rewriting can reach arrays stored inside them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::mmap::{Array, OwnedArray};

/// A task argument or result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Array(Array),
    Record(Record),
}

impl Value {
    /// Name of the variant, used in type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short human-readable rendering used in diagnostics.
    ///
    /// Arrays are summarized by layout instead of contents.
    pub fn summary(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{:?}", v),
            Value::Str(s) => format!("{:?}", s),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::summary).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.summary()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Array(a) => a.summary(),
            Value::Record(r) => format!("<{} with {} attrs>", r.class_name, r.attrs.len()),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Str,
    &str => Str,
    Array => Array,
    Record => Record,
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<OwnedArray> for Value {
    fn from(a: OwnedArray) -> Self {
        Value::Array(Array::InMemory(a))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

/// A plain data holder: a class name plus named attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub class_name: String,
    pub attrs: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }
}

/// Conversion of a user data holder into a [`Record`].
///
/// Implementors enumerate the attributes that should travel with the call.
pub trait IntoRecord {
    fn into_record(self) -> Record;
}

/// Reconstruction of a user data holder from a [`Record`] on the worker side.
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Result<Self, TaskError>;
}

impl IntoRecord for Record {
    fn into_record(self) -> Record {
        self
    }
}

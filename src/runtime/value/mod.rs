//! Core runtime values
//!
//! [`Value`] is what lives on thread stacks and in tables. Heap objects are
//! referenced by generational [`ObjId`]s, so a value never points into freed
//! memory: a stale id fails with a dangling-reference error.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::vm::{NativeCtx, NativeReturn, VMResult};

/// Generational index into the heap arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for ObjId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // stable across peers, unlike a memory address
        write!(f, "0x{:06x}{:02x}", self.index, self.generation & 0xff)
    }
}

/// Native function signature
pub type NativeFn = fn(&mut NativeCtx<'_>, Vec<Value>) -> VMResult<NativeReturn>;

/// A built-in function
///
/// Identity is the qualified name, which is also how the persistence layer
/// recognizes natives it may re-link.
#[derive(Clone, Copy)]
pub struct NativeRef {
    pub name: &'static str,
    pub func: NativeFn,
}

impl NativeRef {
    pub const fn new(
        name: &'static str,
        func: NativeFn,
    ) -> Self {
        Self { name, func }
    }
}

impl PartialEq for NativeRef {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.name == other.name
    }
}

impl Eq for NativeRef {}

impl Hash for NativeRef {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.name.hash(state);
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "NativeRef({})", self.name)
    }
}

/// Script value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Table(ObjId),
    Function(ObjId),
    Native(NativeRef),
    Thread(ObjId),
    Userdata(ObjId),
    /// Boxed local shared with closures, never visible to scripts
    Cell(ObjId),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// Type name as reported by `type()`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Thread(_) => "thread",
            Value::Userdata(_) => "userdata",
            Value::Cell(_) => "cell",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only nil and false are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Heap object this value refers to
    pub fn obj_id(&self) -> Option<ObjId> {
        match self {
            Value::Table(id)
            | Value::Function(id)
            | Value::Thread(id)
            | Value::Userdata(id)
            | Value::Cell(id) => Some(*id),
            _ => None,
        }
    }

    /// Integer view, accepting floats with an exact integral value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(f) => float_to_int(*f),
            Value::Str(s) => match parse_number(s)? {
                Value::Int(v) => Some(v),
                Value::Float(f) => float_to_int(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric view with string coercion
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => match parse_number(s)? {
                Value::Int(v) => Some(v as f64),
                Value::Float(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Number value with string coercion, keeping integers integral
    pub fn to_numeric(&self) -> Option<Value> {
        match self {
            Value::Int(_) | Value::Float(_) => Some(self.clone()),
            Value::Str(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Primitive equality; numbers compare by value across int and float
    pub fn raw_eq(
        &self,
        other: &Value,
    ) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b && float_to_int(*b) == Some(*a)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (a, b) => match (a.obj_id(), b.obj_id()) {
                (Some(x), Some(y)) => x == y && a.type_name() == b.type_name(),
                _ => false,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.raw_eq(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Table(id) => write!(f, "table: {}", id),
            Value::Function(id) => write!(f, "function: {}", id),
            Value::Native(n) => write!(f, "function: builtin: {}", n.name),
            Value::Thread(id) => write!(f, "thread: {}", id),
            Value::Userdata(id) => write!(f, "userdata: {}", id),
            Value::Cell(id) => write!(f, "cell: {}", id),
        }
    }
}

/// `1.0` prints with its fraction, large or special values in Rust's notation
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        if v.is_sign_negative() { "-nan" } else { "nan" }.to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

pub fn float_to_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -9.223_372_036_854_776e18 && f < 9.223_372_036_854_776e18 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a numeric string the way the lexer reads number literals
pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let v = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Value::Int(if negative { v.wrapping_neg() } else { v }));
    }
    if digits.is_empty() || !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(Value::Int(v));
    }
    text.parse::<f64>().ok().map(Value::Float)
}

/// Hashable table key
///
/// Floats with an exact integer value are stored as integers so `t[1]` and
/// `t[1.0]` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral float
    Float(u64),
    Str(Arc<str>),
    Table(ObjId),
    Function(ObjId),
    Native(NativeRef),
    Thread(ObjId),
    Userdata(ObjId),
}

/// Why a value cannot be a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl fmt::Display for KeyError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            KeyError::Nil => write!(f, "table index is nil"),
            KeyError::NaN => write!(f, "table index is NaN"),
        }
    }
}

impl TableKey {
    pub fn from_value(value: &Value) -> Result<TableKey, KeyError> {
        let key = match value {
            Value::Nil => return Err(KeyError::Nil),
            Value::Bool(b) => TableKey::Bool(*b),
            Value::Int(v) => TableKey::Int(*v),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(KeyError::NaN);
                }
                match float_to_int(*f) {
                    Some(i) => TableKey::Int(i),
                    None => TableKey::Float(f.to_bits()),
                }
            }
            Value::Str(s) => TableKey::Str(s.clone()),
            Value::Table(id) => TableKey::Table(*id),
            Value::Function(id) => TableKey::Function(*id),
            Value::Native(n) => TableKey::Native(*n),
            Value::Thread(id) => TableKey::Thread(*id),
            Value::Userdata(id) | Value::Cell(id) => TableKey::Userdata(*id),
        };
        Ok(key)
    }

    pub fn str(s: &str) -> TableKey {
        TableKey::Str(Arc::from(s))
    }

    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Bool(*b),
            TableKey::Int(v) => Value::Int(*v),
            TableKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            TableKey::Str(s) => Value::Str(s.clone()),
            TableKey::Table(id) => Value::Table(*id),
            TableKey::Function(id) => Value::Function(*id),
            TableKey::Native(n) => Value::Native(*n),
            TableKey::Thread(id) => Value::Thread(*id),
            TableKey::Userdata(id) => Value::Userdata(*id),
        }
    }

    /// Heap object the key keeps alive
    pub fn obj_id(&self) -> Option<ObjId> {
        match self {
            TableKey::Table(id)
            | TableKey::Function(id)
            | TableKey::Thread(id)
            | TableKey::Userdata(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests;

//! VM errors

use thiserror::Error;

use crate::runtime::value::{ObjId, Value};

/// VM result
pub type VMResult<T> = Result<T, VMError>;

/// VM errors
#[derive(Debug, Clone, Error)]
pub enum VMError {
    /// Raised by an operation or a native; the position is added where it
    /// surfaces in script code
    #[error("{0}")]
    Runtime(String),

    /// Error value travelling through script frames
    #[error("{message}")]
    Thrown {
        value: Value,
        message: String,
        traceback: Vec<String>,
    },

    /// Not catchable by `pcall`
    #[error("instruction budget of {0} exhausted")]
    BudgetExhausted(u64),

    #[error("dangling reference to object {0}")]
    Dangling(ObjId),
}

impl VMError {
    pub fn runtime(message: impl Into<String>) -> Self {
        VMError::Runtime(message.into())
    }

    /// Whether `pcall` and `coroutine.resume` may intercept this error
    pub fn is_catchable(&self) -> bool {
        !matches!(self, VMError::BudgetExhausted(_))
    }

    /// Value handed to a script that catches the error
    pub fn value(&self) -> Value {
        match self {
            VMError::Thrown { value, .. } => value.clone(),
            other => Value::from(other.to_string()),
        }
    }

    pub fn traceback(&self) -> &[String] {
        match self {
            VMError::Thrown { traceback, .. } => traceback,
            _ => &[],
        }
    }

    /// Build the message shown for an arbitrary error value
    pub fn describe(value: &Value) -> String {
        match value {
            Value::Str(s) => s.to_string(),
            Value::Int(_) | Value::Float(_) => value.to_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        }
    }
}


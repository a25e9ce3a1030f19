//! Errors of the scripting layer
//!
//! [`ScriptError`] is recoverable at the scheduling boundary.
//! [`VersionMismatchError`] always aborts the load it occurs in.
//! [`GameDataError`] is what save and load callers see.

use std::io;

use thiserror::Error;

use crate::frontend::CompileError;
use crate::vm::VMError;

/// Error raised by script code or by the data it hands back
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// Uncaught error while a coroutine or chunk ran
    #[error("{message}")]
    Uncaught {
        message: String,
        traceback: Vec<String>,
    },

    /// A coroutine yielded something the scheduler cannot interpret
    #[error("{0}")]
    BadYield(String),

    /// A popped return value is missing or has the wrong type
    #[error("{0}")]
    BadValue(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("script not found: {0}")]
    MissingScript(String),

    #[error("script '{path}' returned a {found} value, expected a table")]
    NotATable { path: String, found: &'static str },

    /// Malformed coroutine or environment data
    #[error("corrupt script data: {0}")]
    Corrupt(String),
}

impl ScriptError {
    /// Traceback of an uncaught error, innermost frame first
    pub fn traceback(&self) -> &[String] {
        match self {
            ScriptError::Uncaught { traceback, .. } => traceback,
            _ => &[],
        }
    }
}

impl From<VMError> for ScriptError {
    fn from(err: VMError) -> Self {
        ScriptError::Uncaught {
            traceback: err.traceback().to_vec(),
            message: err.to_string(),
        }
    }
}

/// A versioned record carries a version this build does not read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported {what} version {found} (supported: {supported})")]
pub struct VersionMismatchError {
    pub what: &'static str,
    pub found: u32,
    pub supported: String,
}

impl VersionMismatchError {
    pub fn new(
        what: &'static str,
        found: u32,
        supported: impl Into<String>,
    ) -> Self {
        Self {
            what,
            found,
            supported: supported.into(),
        }
    }
}

/// Script failure escalated by the fail-on-script-error policy
#[derive(Debug, Clone, Error)]
#[error("fatal script error: {0}")]
pub struct FatalScriptError(#[from] pub ScriptError);

/// Failure to save or load game data
#[derive(Debug, Error)]
pub enum GameDataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Version(#[from] VersionMismatchError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// The object graph cannot be written or read back
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl GameDataError {
    pub fn persistence(message: impl Into<String>) -> Self {
        GameDataError::Persistence(message.into())
    }
}

impl From<VMError> for GameDataError {
    fn from(err: VMError) -> Self {
        GameDataError::Persistence(err.to_string())
    }
}

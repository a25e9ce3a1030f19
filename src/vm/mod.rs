//! Virtual Machine and bytecode execution
//!
//! This module contains the bytecode interpreter, its thread model and the
//! interface natives are written against.

pub use errors::{VMError, VMResult};
pub use executor::{ResumeOutcome, VMConfig, VM};
pub use extfunc::{NativeCtx, NativeReturn};
pub use frames::{CallFrame, PendingCall, Thread, ThreadStatus};
pub use host::{HostServices, LocalHost};

pub mod errors;
mod executor;
mod extfunc;
pub mod frames;
mod host;
mod instructions;

#[cfg(test)]
mod tests;

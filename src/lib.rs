//! Ludus game scripting engine
//!
//! Resumable script coroutines scheduled against a simulation clock, with
//! the whole interpreter state persisted into savegames.
//!
//! # Example
//!
//! ```lua
//! return { func = function()
//!   while true do
//!     wl.send_message(1, "Reminder", "Build a lumberjack")
//!     coroutine.yield(600)
//!   end
//! end }
//! ```
//!
//! # Layers
//!
//! - [`frontend`] / [`middle`]: lexer, parser and bytecode generator
//! - [`runtime`] / [`vm`]: heap, values and the interpreter
//! - [`std`]: the standard library
//! - [`scripting`]: coroutine scheduling, the `wl` library and persistence
//! - [`game`]: reference collaborators and the session driver

#![doc(html_root_url = "https://docs.rs/ludus")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod frontend;
pub mod middle;
pub mod runtime;
pub mod std;
pub mod vm;

// Game layer
pub mod game;
pub mod scripting;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use tracing::debug;

use crate::runtime::value::Value;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const NAME: &str = "Ludus";

/// Run a chunk of script outside any game and return its results
///
/// # Example
///
/// ```no_run
/// use ludus::{run, Result};
///
/// fn main() -> Result<()> {
///     run("print('Hello, World!')")?;
///     Ok(())
/// }
/// ```
pub fn run(source: &str) -> Result<Vec<Value>> {
    debug!("run called");
    let proto = frontend::compile(source, "main")?;
    let mut vm = vm::VM::new();
    crate::std::install(&mut vm)?;
    let function = vm.load(proto)?;
    let results = vm.call(function, Vec::new(), &mut vm::LocalHost::default())?;
    debug!(results = results.len(), "chunk finished");
    Ok(results)
}

use ::std::fs;
use ::std::path::Path;

/// Run a script file outside any game
pub fn run_file(path: &Path) -> Result<Vec<Value>> {
    debug!(path = %path.display(), "run file");
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let chunk = path.display().to_string();
    let proto = frontend::compile(&source, &chunk)?;
    let mut vm = vm::VM::new();
    crate::std::install(&mut vm)?;
    let function = vm.load(proto)?;
    Ok(vm.call(function, Vec::new(), &mut vm::LocalHost::default())?)
}

//! Game scripting on top of the interpreter
//!
//! Coroutines scheduled against the simulation clock, the `wl` game
//! library, and persistence of the whole interpreter state into savegames.

pub mod collaborators;
pub mod command;
pub mod coroutine;
pub mod errors;
pub mod objects;
pub mod persistence;
pub mod state;
pub mod textdomain;

pub use collaborators::{
    CommandQueue, GameController, GameServices, MessageDelivery, SimulationRng, VirtualFilesystem,
};
pub use command::{CommandOutcome, Due, GameContext, ScheduledCoroutineCommand};
pub use coroutine::{CoroutineArg, CoroutineHandle, CoroutineStatus};
pub use errors::{FatalScriptError, GameDataError, ScriptError, VersionMismatchError};
pub use state::ScriptEngineState;

use crate::std::StdModule;

/// Libraries the game adds on top of the standard ones
pub fn modules() -> Vec<Box<dyn StdModule>> {
    vec![
        Box::new(objects::WlModule),
        Box::new(textdomain::TextdomainModule),
    ]
}

#[cfg(test)]
mod tests;

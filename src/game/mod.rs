//! Reference implementations of the game collaborators
//!
//! Enough of a game to drive scripts from the CLI and from tests: a tick
//! queue, filesystems, a seeded random stream and a session tying them
//! together with savegames.

pub mod fs;
pub mod queue;
pub mod rng;
pub mod savegame;
pub mod session;

pub use fs::{DiskFilesystem, MemoryFilesystem};
pub use queue::TickCommandQueue;
pub use rng::SeededRng;
pub use savegame::{Message, Savegame, SavegameSummary};
pub use session::{Session, World, NORMAL_SPEED};

#[cfg(test)]
mod tests;

//! Services the game provides to script natives

use std::sync::Arc;

use rand::Rng;

use crate::middle::Proto;

/// What natives may ask of the surrounding game
///
/// Everything reachable from here must be deterministic across peers,
/// except what is explicitly documented otherwise.
pub trait HostServices {
    /// Next value of the simulation's synchronized random stream
    fn random_u32(&mut self) -> u32;

    /// Current game time in ticks
    fn gametime(&self) -> u64;

    /// Occupied player slots
    fn player_numbers(&self) -> Vec<u8>;

    /// Deliver an inbox message to one player
    fn send_message(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    ) -> Result<(), String>;

    /// Resolve and compile a script for `include`
    fn load_chunk(
        &mut self,
        path: &str,
    ) -> Result<Arc<Proto>, String> {
        Err(format!("cannot include '{}': no script loader", path))
    }
}

/// Host for plain interpreter use outside a game
///
/// Draws randomness from local entropy, so it is not deterministic.
#[derive(Debug, Default)]
pub struct LocalHost {
    pub time: u64,
}

impl HostServices for LocalHost {
    fn random_u32(&mut self) -> u32 {
        rand::rng().random()
    }

    fn gametime(&self) -> u64 {
        self.time
    }

    fn player_numbers(&self) -> Vec<u8> {
        Vec::new()
    }

    fn send_message(
        &mut self,
        player: u8,
        _title: &str,
        _body: &str,
    ) -> Result<(), String> {
        Err(format!("no player {}", player))
    }
}

//! Synchronized random stream

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scripting::SimulationRng;

/// Seeded generator whose state is `(seed, draws)`
///
/// Restoring replays `draws` values from the seed, so every peer that loads
/// the same savegame continues with the same stream.
#[derive(Debug, Clone)]
pub struct SeededRng {
    seed: u64,
    draws: u64,
    rng: StdRng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator positioned after `draws` values
    pub fn restore(
        seed: u64,
        draws: u64,
    ) -> Self {
        let mut rng = Self::new(seed);
        for _ in 0..draws {
            rng.next_u32();
        }
        rng
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl SimulationRng for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.draws += 1;
        self.rng.random()
    }
}

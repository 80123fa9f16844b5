//! Synthetic input for headless clients.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::MoveInput;

/// Produces random movement deltas in `[-max_step, max_step]` on each axis.
pub struct RandomWalk {
    rng: StdRng,
    max_step: i32,
}

impl RandomWalk {
    pub fn new(max_step: i32) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            max_step: max_step.abs(),
        }
    }

    /// A reproducible walk, for tests and benchmarks.
    pub fn with_seed(max_step: i32, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_step: max_step.abs(),
        }
    }

    pub fn next_input(&mut self) -> MoveInput {
        MoveInput {
            dx: self.rng.gen_range(-self.max_step..=self.max_step),
            dy: self.rng.gen_range(-self.max_step..=self.max_step),
        }
    }
}

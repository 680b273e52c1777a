//! Deterministic test doubles for the randomness capability.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::Result;
use crate::primitives::RandomSource;

/// Seeded random source producing the same byte stream for a given seed.
///
/// Used wherever a test needs reproducible splits, IVs, or key ids.
pub(crate) struct FixedRandom {
    inner: Mutex<StdRng>,
}

impl FixedRandom {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for FixedRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        self.inner.lock().expect("rng lock poisoned").fill_bytes(dest);
        Ok(())
    }
}

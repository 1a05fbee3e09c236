//! Deterministic PRNG for duration sampling and routing decisions.
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, and identical
//! output on every platform. [`SimRng`] implements [`rand::RngCore`] so the
//! `rand_distr` distributions can sample from it directly.

use rand::distributions::Distribution;
use rand::{Rng, RngCore};

/// SplitMix64 pseudo-random number generator.
///
/// One instance per simulation. Every random decision (durations, random
/// routing, tie-breaks) draws from it in event order, so a fixed seed gives
/// a fixed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn step(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "index() on an empty range");
        self.gen_range(0..len)
    }

    /// Draw one value from a real-valued distribution.
    pub fn sample<D: Distribution<f64>>(&mut self, distribution: &D) -> f64 {
        distribution.sample(self)
    }

}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        (self.step() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.step()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.step().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

//! Run configuration, run summaries, and the trace hash.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};

use crate::fixed::SimTime;

// ---------------------------------------------------------------------------
// Simulation config
// ---------------------------------------------------------------------------

/// Engine-wide settings, fixed at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every random draw (durations, routing choices).
    pub seed: u64,
    /// How long a product waits before routing again when every capable
    /// destination is full.
    pub retry_delay: SimTime,
    /// Events kept by the trace ring buffer.
    pub trace_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            retry_delay: SimTime::ONE,
            trace_capacity: 4096,
        }
    }
}

impl SimulationConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Result of an `Engine::run_until()` call. Product counts cover the whole
/// run so far, not just this call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub started_at: SimTime,
    pub ended_at: SimTime,
    /// Task steps executed during this call.
    pub resumptions: u64,
    pub products_created: u64,
    pub products_finished: u64,
    pub products_failed: u64,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the bytes of a run's trace. Unlike the std hashers it
/// is unkeyed, so the value is stable across processes and platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(u64);

impl StateHash {
    pub fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StateHash {
    fn write(&mut self, bytes: &[u8]) {
        self.0 = bytes
            .iter()
            .fold(self.0, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

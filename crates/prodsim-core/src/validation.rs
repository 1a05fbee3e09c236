//! Determinism checking.
//!
//! Two engines built from the same description and seed must emit the same
//! trace. [`validate_determinism`] runs two fresh engines side by side and
//! compares their running trace hashes at each checkpoint;
//! [`first_divergence`] pinpoints the first differing event.

use crate::engine::{Engine, SimError};
use crate::event::SimEvent;
use crate::fixed::SimTime;

/// Result of a determinism validation run.
#[derive(Debug, Clone)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// First checkpoint at which the hashes differed.
    pub divergence_time: Option<SimTime>,
    /// `(checkpoint, hash_a, hash_b)` per checkpoint.
    pub hash_log: Vec<(SimTime, u64, u64)>,
}

/// Build two engines with `factory`, run both to every checkpoint in turn,
/// and compare trace hashes.
pub fn validate_determinism<F>(factory: F, checkpoints: &[SimTime]) -> Result<DeterminismResult, SimError>
where
    F: Fn() -> Result<Engine, SimError>,
{
    let mut engine_a = factory()?;
    let mut engine_b = factory()?;

    let mut hash_log = Vec::with_capacity(checkpoints.len());
    let mut divergence_time = None;

    for &checkpoint in checkpoints {
        engine_a.run_until(checkpoint)?;
        engine_b.run_until(checkpoint)?;

        let hash_a = engine_a.trace_hash();
        let hash_b = engine_b.trace_hash();
        hash_log.push((checkpoint, hash_a, hash_b));

        if hash_a != hash_b && divergence_time.is_none() {
            divergence_time = Some(checkpoint);
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_time.is_none(),
        divergence_time,
        hash_log,
    })
}

/// Index and the pair of events where two retained traces first differ.
/// A trace that is a strict prefix of the other diverges at its end.
pub fn first_divergence<'a>(a: &'a Engine, b: &'a Engine) -> Option<(usize, Option<&'a SimEvent>, Option<&'a SimEvent>)> {
    let mut ia = a.trace().iter();
    let mut ib = b.trace().iter();
    let mut index = 0;
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return None,
            (ea, eb) if ea != eb => return Some((index, ea, eb)),
            _ => index += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn line() -> Result<Engine, SimError> {
        Ok(simple_line(3.0, 2.0, 2))
    }

    // -----------------------------------------------------------------------
    // Test 1: the same description runs identically twice
    // -----------------------------------------------------------------------
    #[test]
    fn identical_builds_are_deterministic() {
        let checkpoints = [t(10.0), t(25.0), t(60.0)];
        let result = validate_determinism(line, &checkpoints).unwrap();
        assert!(result.is_deterministic);
        assert!(result.divergence_time.is_none());
        assert_eq!(result.hash_log.len(), 3);
        for (_, a, b) in &result.hash_log {
            assert_eq!(a, b);
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: a different arrival rate diverges
    // -----------------------------------------------------------------------
    #[test]
    fn different_runs_diverge() {
        let mut a = simple_line(3.0, 2.0, 2);
        let mut b = simple_line(4.0, 2.0, 2);
        a.run_until(t(20.0)).unwrap();
        b.run_until(t(20.0)).unwrap();
        assert_ne!(a.trace_hash(), b.trace_hash());
        let (_, ea, eb) = first_divergence(&a, &b).unwrap();
        assert_ne!(ea, eb);

        let mut c = simple_line(3.0, 2.0, 2);
        c.run_until(t(20.0)).unwrap();
        assert!(first_divergence(&a, &c).is_none());
    }
}

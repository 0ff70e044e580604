//! Probabilistic load shedding.
//!
//! A record whose criticality is at least the current austerity level is
//! always kept. Below it, each level of difference cuts the keep probability
//! by 10x: with austerity Critical, a Sheddable line survives 1 time in 100.
//! Shed records keep their timestamp; the content is replaced wholesale.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Filter;
use crate::austerity::AusterityLevels;
use crate::clevels::{self, AusterityLevel, CriticalityLevel};
use crate::json::LogLine;

/// Replacement text for a shed text record.
pub const SHED_SENTINEL: &str = "(shedded)";

/// Outcome of a shedding decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Write the record as is.
    Keep,
    /// Replace the record with its shed form.
    Shed,
}

/// Probability of keeping a record of `criticality` under `austerity`.
pub fn sampling_rate(austerity: AusterityLevel, criticality: CriticalityLevel) -> f64 {
    if criticality >= austerity {
        return 1.0;
    }
    let diff = austerity.rank().saturating_sub(criticality.rank());
    1.0 / 10f64.powi(i32::from(diff))
}

/// Decide with a uniform `draw` in `[0, 1)`: keep when `draw < rate`.
pub fn decide(criticality: CriticalityLevel, austerity: AusterityLevel, draw: f64) -> Decision {
    if criticality >= austerity {
        return Decision::Keep;
    }
    if draw < sampling_rate(austerity, criticality) {
        Decision::Keep
    } else {
        Decision::Shed
    }
}

/// Applies the system austerity level to each record.
pub struct SheddingFilter {
    levels: AusterityLevels,
    rng: Mutex<StdRng>,
}

impl SheddingFilter {
    /// Shed against the live level in `levels`.
    pub fn new(levels: AusterityLevels) -> Self {
        Self {
            levels,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Like [`new`](Self::new) with a deterministic random sequence.
    pub fn with_seed(levels: AusterityLevels, seed: u64) -> Self {
        Self {
            levels,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Decide for one record of `criticality` against the current level.
    pub fn should_shed(&self, criticality: CriticalityLevel) -> bool {
        let austerity = self.levels.current();
        if criticality >= austerity {
            return false;
        }
        let draw = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen::<f64>();
        decide(criticality, austerity, draw) == Decision::Shed
    }
}

impl Filter for SheddingFilter {
    fn filter_line(&self, line: Vec<u8>) -> Vec<u8> {
        if self.should_shed(clevels::criticality(&line)) {
            return SHED_SENTINEL.as_bytes().to_vec();
        }
        line
    }

    fn filter_json(&self, line: &mut LogLine) {
        if self.should_shed(clevels::json_criticality(line)) {
            line.shed();
        }
    }
}

impl std::fmt::Debug for SheddingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheddingFilter")
            .field("austerity", &self.levels.current())
            .finish_non_exhaustive()
    }
}

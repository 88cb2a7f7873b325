//! Refit cadence.
//!
//! Offsets count scored points since the engine became active (offset 0 is
//! the first scored point). A refit is due when the scorer holds no fitted
//! state, or when `cadence` points have passed since the last refit attempt.
//! With successful fits this lands exactly on multiples of the cadence.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainScheduler {
    cadence: u64,
    last_attempt: Option<u64>,
    fits: u64,
    failures: u64,
}

impl RetrainScheduler {
    /// `cadence` is clamped to at least 1 (refit every point).
    pub fn new(cadence: usize) -> Self {
        Self {
            cadence: cadence.max(1) as u64,
            last_attempt: None,
            fits: 0,
            failures: 0,
        }
    }

    pub fn is_due(&self, offset: u64, fitted: bool) -> bool {
        if !fitted {
            return true;
        }
        match self.last_attempt {
            None => true,
            Some(last) => offset >= last + self.cadence,
        }
    }

    /// Record a refit attempt at `offset`, successful or not.
    pub fn record(&mut self, offset: u64, succeeded: bool) {
        self.last_attempt = Some(offset);
        if succeeded {
            self.fits += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    pub fn last_attempt(&self) -> Option<u64> {
        self.last_attempt
    }

    pub fn fits(&self) -> u64 {
        self.fits
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

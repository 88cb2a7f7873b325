//! Isolation-forest scorer.
//!
//! Each refit grows a fresh forest on the trailing window. The forest seed is
//! derived from the configured seed and the refit count, so two engines fed
//! the same stream produce identical forests.

use super::{FitWindow, ScoreResult, Scorer};
use crate::algo::{FittedForest, IsolationForest};
use crate::checkpoint::{self, CheckpointError};
use crate::config::IsolationConfig;
use crate::error::{FitError, ScoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAME: &str = "isolation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationState {
    forest: FittedForest,
    refits: u64,
}

#[derive(Debug, Clone)]
pub struct IsolationScorer {
    forest: IsolationForest,
    seed: u64,
    refits: u64,
    state: Option<IsolationState>,
}

impl IsolationScorer {
    pub fn new(config: &IsolationConfig) -> Self {
        Self {
            forest: IsolationForest::new(config.n_trees, config.max_samples, config.contamination),
            seed: config.seed,
            refits: 0,
            state: None,
        }
    }

    pub fn fitted(&self) -> Option<&FittedForest> {
        self.state.as_ref().map(|s| &s.forest)
    }

    /// Successful refits so far.
    pub fn refits(&self) -> u64 {
        self.refits
    }
}

impl Default for IsolationScorer {
    fn default() -> Self {
        Self::new(&IsolationConfig::default())
    }
}

impl Scorer for IsolationScorer {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_window(&self) -> FitWindow {
        FitWindow::Inclusive
    }

    /// On failure the previous forest stays in place.
    fn fit(&mut self, window: &[f64]) -> Result<(), FitError> {
        let seed = self.seed.wrapping_add(self.refits);
        let forest = self.forest.fit(window, seed)?;
        debug!(
            seed,
            threshold = forest.threshold(),
            training_size = forest.training_size(),
            "isolation forest refit"
        );
        self.refits += 1;
        self.state = Some(IsolationState {
            forest,
            refits: self.refits,
        });
        Ok(())
    }

    fn score(&self, _history: &[f64], value: f64) -> Result<ScoreResult, ScoreError> {
        let state = self.state.as_ref().ok_or(ScoreError::NotFitted)?;
        let raw_score = state.forest.score(value);
        Ok(ScoreResult::Isolation {
            is_anomaly: state.forest.is_anomaly(raw_score),
            raw_score: Some(raw_score),
        })
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn checkpoint(&self) -> Result<Vec<u8>, CheckpointError> {
        checkpoint::encode(NAME, self.state.as_ref())
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), CheckpointError> {
        let state: Option<IsolationState> = checkpoint::decode(NAME, bytes)?;
        self.refits = state.as_ref().map_or(0, |s| s.refits);
        self.state = state;
        Ok(())
    }

    fn get_stats(&self) -> String {
        match &self.state {
            Some(state) => format!(
                "Isolation: trees={}, threshold={:.4}, refits={}, contamination={:.3}",
                state.forest.num_trees(),
                state.forest.threshold(),
                state.refits,
                self.forest.contamination()
            ),
            None => "Isolation: unfitted".to_string(),
        }
    }
}

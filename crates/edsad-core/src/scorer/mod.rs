//! Pluggable scorers.
//!
//! A scorer owns its fitted state outright. `fit` replaces that state
//! wholesale; `score` only reads it. Nothing is shared between scorer
//! instances, so any number of engines can run side by side.

pub mod forecast;
pub mod isolation;

pub use forecast::ForecastScorer;
pub use isolation::IsolationScorer;

use crate::checkpoint::CheckpointError;
use crate::config::{DetectorConfig, StrategyKind};
use crate::error::{FitError, ScoreError};
use serde::{Deserialize, Serialize};

/// Which points a refit window covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitWindow {
    /// The W points strictly before the candidate; the first W points warm up
    /// the buffer and the candidate is appended after scoring.
    Preceding,
    /// The most recent W points including the candidate; a warm-up fit runs
    /// once the first W points have arrived.
    Inclusive,
}

/// Raw scorer output for one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ScoreResult {
    Forecast {
        predicted: f64,
        residual: f64,
        is_anomaly: bool,
    },
    Isolation {
        is_anomaly: bool,
        raw_score: Option<f64>,
    },
}

impl ScoreResult {
    pub fn is_anomaly(&self) -> bool {
        match self {
            Self::Forecast { is_anomaly, .. } | Self::Isolation { is_anomaly, .. } => *is_anomaly,
        }
    }

    /// Residual for forecasts, raw score for isolation.
    pub fn diagnostic(&self) -> Option<f64> {
        match self {
            Self::Forecast { residual, .. } => Some(*residual),
            Self::Isolation { raw_score, .. } => *raw_score,
        }
    }

    pub fn predicted(&self) -> Option<f64> {
        match self {
            Self::Forecast { predicted, .. } => Some(*predicted),
            Self::Isolation { .. } => None,
        }
    }
}

/// The single capability the engine needs from a model.
pub trait Scorer: Send {
    fn name(&self) -> &str;

    fn fit_window(&self) -> FitWindow;

    /// Full refit on `window` (oldest first).
    fn fit(&mut self, window: &[f64]) -> Result<(), FitError>;

    /// Score `value` against the current fit. `history` is the trailing
    /// window preceding `value`.
    fn score(&self, history: &[f64], value: f64) -> Result<ScoreResult, ScoreError>;

    fn is_fitted(&self) -> bool;

    /// Versioned bincode snapshot of the fitted state.
    fn checkpoint(&self) -> Result<Vec<u8>, CheckpointError>;

    /// Replace the fitted state with a snapshot taken from the same strategy.
    fn restore(&mut self, bytes: &[u8]) -> Result<(), CheckpointError>;

    fn get_stats(&self) -> String {
        String::new()
    }
}

impl<S: Scorer + ?Sized> Scorer for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fit_window(&self) -> FitWindow {
        (**self).fit_window()
    }

    fn fit(&mut self, window: &[f64]) -> Result<(), FitError> {
        (**self).fit(window)
    }

    fn score(&self, history: &[f64], value: f64) -> Result<ScoreResult, ScoreError> {
        (**self).score(history, value)
    }

    fn is_fitted(&self) -> bool {
        (**self).is_fitted()
    }

    fn checkpoint(&self) -> Result<Vec<u8>, CheckpointError> {
        (**self).checkpoint()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), CheckpointError> {
        (**self).restore(bytes)
    }

    fn get_stats(&self) -> String {
        (**self).get_stats()
    }
}

/// Build the scorer selected by `config.strategy`.
pub fn build_scorer(config: &DetectorConfig) -> Box<dyn Scorer> {
    match config.strategy {
        StrategyKind::Forecast => Box::new(ForecastScorer::new(&config.forecast)),
        StrategyKind::Isolation => Box::new(IsolationScorer::new(&config.isolation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_result_accessors() {
        let forecast = ScoreResult::Forecast {
            predicted: 1.0,
            residual: 2.5,
            is_anomaly: true,
        };
        assert!(forecast.is_anomaly());
        assert_eq!(forecast.diagnostic(), Some(2.5));
        assert_eq!(forecast.predicted(), Some(1.0));

        let isolation = ScoreResult::Isolation {
            is_anomaly: false,
            raw_score: Some(0.42),
        };
        assert!(!isolation.is_anomaly());
        assert_eq!(isolation.diagnostic(), Some(0.42));
        assert_eq!(isolation.predicted(), None);
    }

    #[test]
    fn test_build_scorer_follows_strategy() {
        let forecast = build_scorer(&DetectorConfig::for_strategy(StrategyKind::Forecast));
        assert_eq!(forecast.name(), "forecast");
        assert_eq!(forecast.fit_window(), FitWindow::Preceding);

        let isolation = build_scorer(&DetectorConfig::for_strategy(StrategyKind::Isolation));
        assert_eq!(isolation.name(), "isolation");
        assert_eq!(isolation.fit_window(), FitWindow::Inclusive);
    }
}

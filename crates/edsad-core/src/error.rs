//! Error taxonomy for the detection engine.
//!
//! Per-point failures (`FitError`, `ScoreError`) never abort a run; the engine
//! turns them into undetermined records. `StreamError` comes from sources and
//! only becomes fatal once it repeats (see [`EngineError::SourceFailed`]).

use thiserror::Error;

/// A model could not be fit on the given window.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("insufficient data: required {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("window has no variation (variance {variance:e})")]
    Degenerate { variance: f64 },

    #[error("window contains NaN or infinite values")]
    NonFinite,

    #[error("optimizer did not converge after {iterations} iterations")]
    NonConvergence { iterations: u64 },

    #[error("optimizer failed: {0}")]
    Optimizer(String),
}

/// Scoring a point failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("scorer not fitted: call fit() before score()")]
    NotFitted,

    #[error("refit failed: {0}")]
    Fit(#[from] FitError),
}

/// Upstream generation or read failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("stream source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed input at position {position}: {reason}")]
    Malformed { position: u64, reason: String },
}

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter: {name} - {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Run-level failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine terminated: no further observations are accepted")]
    Terminated,

    #[error("stream source failed {consecutive} times in a row: {last}")]
    SourceFailed { consecutive: usize, last: StreamError },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_error_display() {
        let error = FitError::InsufficientData {
            required: 2,
            actual: 1,
        };
        assert_eq!(error.to_string(), "insufficient data: required 2, got 1");
    }

    #[test]
    fn test_score_error_wraps_fit_error() {
        let error: ScoreError = FitError::NonFinite.into();
        assert_eq!(
            error.to_string(),
            "refit failed: window contains NaN or infinite values"
        );
    }

    #[test]
    fn test_source_failed_display() {
        let error = EngineError::SourceFailed {
            consecutive: 3,
            last: StreamError::Unavailable("sensor offline".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "stream source failed 3 times in a row: stream source unavailable: sensor offline"
        );
    }
}

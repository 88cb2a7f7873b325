//! Detector configuration.
//!
//! Every field is defaulted. `window_size` and `refit_cadence` fall back to
//! per-strategy defaults when omitted, so a TOML file can be as small as
//! `strategy = "isolation"`.

use crate::algo::ArimaOrder;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FORECAST_WINDOW: usize = 50;
pub const FORECAST_CADENCE: usize = 1;
pub const ISOLATION_WINDOW: usize = 100;
pub const ISOLATION_CADENCE: usize = 10;
pub const WHOLE_SERIES_CONTAMINATION: f64 = 0.01;
const DEFAULT_MAX_SOURCE_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Forecast,
    Isolation,
}

impl StrategyKind {
    pub fn default_window(&self) -> usize {
        match self {
            Self::Forecast => FORECAST_WINDOW,
            Self::Isolation => ISOLATION_WINDOW,
        }
    }

    pub fn default_cadence(&self) -> usize {
        match self {
            Self::Forecast => FORECAST_CADENCE,
            Self::Isolation => ISOLATION_CADENCE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forecast => "forecast",
            Self::Isolation => "isolation",
        }
    }
}

/// Forecast-residual scorer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Residuals strictly above this are anomalous.
    pub threshold: f64,
    pub order: ArimaOrder,
    pub max_iterations: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            order: ArimaOrder::default(),
            max_iterations: 1_000,
        }
    }
}

/// Isolation scorer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Expected share of outliers in a fit window, in (0, 0.5].
    pub contamination: f64,
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

impl IsolationConfig {
    /// Settings for a single fit over a whole finite series.
    pub fn whole_series() -> Self {
        Self {
            contamination: WHOLE_SERIES_CONTAMINATION,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let contamination = self.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(ConfigError::invalid(
                "contamination",
                format!("must be in (0, 0.5], got {contamination}"),
            ));
        }
        if self.n_trees == 0 {
            return Err(ConfigError::invalid("n_trees", "must be at least 1"));
        }
        if self.max_samples < 2 {
            return Err(ConfigError::invalid("max_samples", "must be at least 2"));
        }
        Ok(())
    }
}

/// Resolved engine-level parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub window_size: usize,
    pub refit_cadence: usize,
    /// Consecutive source errors tolerated before a run fails.
    pub max_source_errors: usize,
}

impl EngineConfig {
    pub fn for_strategy(kind: StrategyKind) -> Self {
        Self {
            window_size: kind.default_window(),
            refit_cadence: kind.default_cadence(),
            max_source_errors: DEFAULT_MAX_SOURCE_ERRORS,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_refit_cadence(mut self, refit_cadence: usize) -> Self {
        self.refit_cadence = refit_cadence;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 2 {
            return Err(ConfigError::invalid("window_size", "must be at least 2"));
        }
        if self.refit_cadence == 0 {
            return Err(ConfigError::invalid("refit_cadence", "must be at least 1"));
        }
        if self.max_source_errors == 0 {
            return Err(ConfigError::invalid("max_source_errors", "must be at least 1"));
        }
        Ok(())
    }
}

/// Top-level configuration, as loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub strategy: StrategyKind,
    pub window_size: Option<usize>,
    pub refit_cadence: Option<usize>,
    pub max_source_errors: usize,
    pub forecast: ForecastConfig,
    pub isolation: IsolationConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::for_strategy(StrategyKind::default())
    }
}

impl DetectorConfig {
    pub fn for_strategy(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            window_size: None,
            refit_cadence: None,
            max_source_errors: DEFAULT_MAX_SOURCE_ERRORS,
            forecast: ForecastConfig::default(),
            isolation: IsolationConfig::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            window_size: self
                .window_size
                .unwrap_or_else(|| self.strategy.default_window()),
            refit_cadence: self
                .refit_cadence
                .unwrap_or_else(|| self.strategy.default_cadence()),
            max_source_errors: self.max_source_errors,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine().validate()?;

        let threshold = self.forecast.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::invalid(
                "threshold",
                format!("must be finite and non-negative, got {threshold}"),
            ));
        }
        if self.strategy == StrategyKind::Forecast {
            let min_window = self.forecast.order.min_window();
            if self.engine().window_size < min_window {
                return Err(ConfigError::invalid(
                    "window_size",
                    format!("order {:?} needs at least {min_window} points", self.forecast.order),
                ));
            }
        }

        self.isolation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strategy_defaults() {
        let forecast = DetectorConfig::for_strategy(StrategyKind::Forecast).engine();
        assert_eq!((forecast.window_size, forecast.refit_cadence), (50, 1));

        let isolation = DetectorConfig::for_strategy(StrategyKind::Isolation).engine();
        assert_eq!((isolation.window_size, isolation.refit_cadence), (100, 10));
    }

    #[test]
    fn test_minimal_toml() {
        let config = DetectorConfig::from_toml_str("strategy = \"isolation\"").unwrap();
        assert_eq!(config.strategy, StrategyKind::Isolation);
        assert_eq!(config.engine().window_size, 100);
        assert_eq!(config.isolation.contamination, 0.05);
    }

    #[test]
    fn test_toml_overrides() {
        let raw = r#"
            strategy = "forecast"
            window_size = 30
            refit_cadence = 5

            [forecast]
            threshold = 1.5

            [forecast.order]
            p = 2
            d = 1
            q = 0
        "#;
        let config = DetectorConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.engine().window_size, 30);
        assert_eq!(config.engine().refit_cadence, 5);
        assert_eq!(config.forecast.threshold, 1.5);
        assert_eq!(config.forecast.order, ArimaOrder::new(2, 1, 0));
        assert_eq!(config.forecast.max_iterations, 1_000);
    }

    #[test]
    fn test_rejects_bad_contamination() {
        let err = DetectorConfig::from_toml_str("[isolation]\ncontamination = 0.9").unwrap_err();
        assert!(err.to_string().contains("contamination"));
    }

    #[test]
    fn test_rejects_window_too_short_for_order() {
        let mut config = DetectorConfig::default();
        config.window_size = Some(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_cadence() {
        let mut config = DetectorConfig::for_strategy(StrategyKind::Isolation);
        config.refit_cadence = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strategy = \"forecast\"\n[forecast]\nthreshold = 3.0").unwrap();

        let config = DetectorConfig::load(file.path()).unwrap();
        assert_eq!(config.forecast.threshold, 3.0);
    }
}

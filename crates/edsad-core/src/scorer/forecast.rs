//! Forecast-residual scorer (ARIMA one-step forecast).
//!
//! The default cadence refits on every point, which costs a full
//! optimisation over W values per point. With a cadence K above one, the
//! coefficients from the last fit are reused and applied to the current
//! trailing window: forecasts still follow the newest data, but the model
//! dynamics lag by up to K - 1 points.

use super::{FitWindow, ScoreResult, Scorer};
use crate::algo::{Arima, ArimaFit};
use crate::checkpoint::{self, CheckpointError};
use crate::config::ForecastConfig;
use crate::error::{FitError, ScoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAME: &str = "forecast";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ForecastState {
    fit: ArimaFit,
    window: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ForecastScorer {
    arima: Arima,
    threshold: f64,
    state: Option<ForecastState>,
}

impl ForecastScorer {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            arima: Arima::new(config.order).with_max_iterations(config.max_iterations),
            threshold: config.threshold,
            state: None,
        }
    }

    /// One-step forecast following the most recent fit window.
    pub fn forecast(&self) -> Result<f64, ScoreError> {
        let state = self.state.as_ref().ok_or(ScoreError::NotFitted)?;
        Ok(state.fit.forecast(&state.window)?)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn fitted(&self) -> Option<&ArimaFit> {
        self.state.as_ref().map(|s| &s.fit)
    }
}

impl Default for ForecastScorer {
    fn default() -> Self {
        Self::new(&ForecastConfig::default())
    }
}

impl Scorer for ForecastScorer {
    fn name(&self) -> &str {
        NAME
    }

    fn fit_window(&self) -> FitWindow {
        FitWindow::Preceding
    }

    /// A failed fit clears the previous state: a forecast from an older
    /// window would be for a different point.
    fn fit(&mut self, window: &[f64]) -> Result<(), FitError> {
        match self.arima.fit(window) {
            Ok(fit) => {
                debug!(
                    phi = ?fit.phi,
                    theta = ?fit.theta,
                    sigma2 = fit.sigma2,
                    rejected = fit.rejected,
                    iterations = fit.iterations,
                    "ARIMA refit"
                );
                self.state = Some(ForecastState {
                    fit,
                    window: window.to_vec(),
                });
                Ok(())
            }
            Err(e) => {
                self.state = None;
                Err(e)
            }
        }
    }

    fn score(&self, history: &[f64], value: f64) -> Result<ScoreResult, ScoreError> {
        let state = self.state.as_ref().ok_or(ScoreError::NotFitted)?;
        let predicted = state.fit.forecast(history)?;
        let residual = (value - predicted).abs();
        Ok(ScoreResult::Forecast {
            predicted,
            residual,
            is_anomaly: residual > self.threshold,
        })
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn checkpoint(&self) -> Result<Vec<u8>, CheckpointError> {
        checkpoint::encode(NAME, self.state.as_ref())
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), CheckpointError> {
        self.state = checkpoint::decode(NAME, bytes)?;
        Ok(())
    }

    fn get_stats(&self) -> String {
        match &self.state {
            Some(state) => format!(
                "Forecast: order={:?}, phi={:?}, theta={:?}, σ²={:.4}, thresh={:.2}",
                state.fit.order, state.fit.phi, state.fit.theta, state.fit.sigma2, self.threshold
            ),
            None => format!("Forecast: unfitted, thresh={:.2}", self.threshold),
        }
    }
}

//! Synthetic seasonal stream with controlled anomaly injection.
//!
//! value(t) = amplitude · sin(2πt / period)
//!          + daily.amplitude · sin(2πt / daily.period)   (optional)
//!          + N(0, noise_std)
//!          + anomaly offset                              (random or explicit)
//!
//! Random anomalies land with probability `anomaly_probability` and an offset
//! drawn from N(0, anomaly_magnitude). Explicit injections add a fixed offset
//! at a given index. Every index that received an offset is recorded as
//! ground truth.

use edsad_core::{Observation, StreamError, StreamSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid generator parameter: {name} - {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Secondary sinusoid layered on the main season.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    pub amplitude: f64,
    pub period: f64,
}

/// Fixed offset added at one index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub index: u64,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub period: f64,
    pub amplitude: f64,
    pub daily: Option<Harmonic>,
    pub noise_std: f64,
    pub anomaly_probability: f64,
    pub anomaly_magnitude: f64,
    pub seed: u64,
    pub injections: Vec<Injection>,
    /// Stop after this many points; unbounded when `None`.
    pub limit: Option<u64>,
    /// Delay between points in live mode.
    pub pacing_ms: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            period: 50.0,
            amplitude: 1.0,
            daily: None,
            noise_std: 0.5,
            anomaly_probability: 0.05,
            anomaly_magnitude: 5.0,
            seed: 42,
            injections: Vec::new(),
            limit: None,
            pacing_ms: None,
        }
    }
}

impl GeneratorConfig {
    /// Seasonal amplitude 10 over period 50 plus a daily cycle of amplitude 5
    /// over period 10, noise σ 2.
    pub fn seasonal_daily() -> Self {
        Self {
            amplitude: 10.0,
            daily: Some(Harmonic {
                amplitude: 5.0,
                period: 10.0,
            }),
            noise_std: 2.0,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn inject(mut self, index: u64, offset: f64) -> Self {
        self.injections.push(Injection { index, offset });
        self
    }

    pub fn pacing(&self) -> Option<Duration> {
        self.pacing_ms.map(Duration::from_millis)
    }

    /// Noise-free seasonal level at `t`.
    pub fn baseline(&self, t: u64) -> f64 {
        let t = t as f64;
        let mut level = self.amplitude * (TAU * t / self.period).sin();
        if let Some(daily) = &self.daily {
            level += daily.amplitude * (TAU * t / daily.period).sin();
        }
        level
    }

    fn validate(&self) -> Result<(), GeneratorError> {
        let invalid = |name, reason: &str| GeneratorError::InvalidParameter {
            name,
            reason: reason.to_string(),
        };
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err(invalid("period", "must be positive"));
        }
        if let Some(daily) = &self.daily {
            if !(daily.period.is_finite() && daily.period > 0.0) {
                return Err(invalid("daily.period", "must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return Err(invalid("anomaly_probability", "must be in [0, 1]"));
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(invalid("noise_std", "must be finite and non-negative"));
        }
        if !(self.anomaly_magnitude.is_finite() && self.anomaly_magnitude >= 0.0) {
            return Err(invalid("anomaly_magnitude", "must be finite and non-negative"));
        }
        Ok(())
    }
}

pub struct SyntheticSource {
    config: GeneratorConfig,
    rng: StdRng,
    noise: Normal<f64>,
    magnitude: Normal<f64>,
    injections: BTreeMap<u64, f64>,
    next_index: u64,
    ground_truth: Vec<u64>,
}

impl SyntheticSource {
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_std).map_err(|e| {
            GeneratorError::InvalidParameter {
                name: "noise_std",
                reason: e.to_string(),
            }
        })?;
        let magnitude = Normal::new(0.0, config.anomaly_magnitude).map_err(|e| {
            GeneratorError::InvalidParameter {
                name: "anomaly_magnitude",
                reason: e.to_string(),
            }
        })?;

        let mut injections = BTreeMap::new();
        for injection in &config.injections {
            *injections.entry(injection.index).or_insert(0.0) += injection.offset;
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            magnitude,
            injections,
            next_index: 0,
            ground_truth: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Indices that received an anomaly offset so far, ascending.
    pub fn ground_truth(&self) -> &[u64] {
        &self.ground_truth
    }

    /// Generate up to `n` values (fewer if the limit is reached).
    pub fn take_values(&mut self, n: usize) -> Vec<f64> {
        let mut values = Vec::with_capacity(n);
        while values.len() < n {
            match self.generate() {
                Some(observation) => values.push(observation.value),
                None => break,
            }
        }
        values
    }

    fn generate(&mut self) -> Option<Observation> {
        if self.config.limit.is_some_and(|limit| self.next_index >= limit) {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let mut value = self.config.baseline(index) + self.noise.sample(&mut self.rng);

        // Always draw, so explicit injections do not shift the random sequence.
        let roll: f64 = self.rng.random();
        let random_offset = self.magnitude.sample(&mut self.rng);

        let mut anomalous = false;
        if roll < self.config.anomaly_probability {
            value += random_offset;
            anomalous = true;
        }
        if let Some(offset) = self.injections.get(&index) {
            value += offset;
            anomalous = true;
        }
        if anomalous {
            self.ground_truth.push(index);
        }
        Some(Observation::new(index, value))
    }
}

impl StreamSource for SyntheticSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        Ok(self.generate())
    }
}

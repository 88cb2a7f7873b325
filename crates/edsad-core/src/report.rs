//! Batch detection report.
//!
//! [`detect_batch`] runs an engine over a finite source and lists every input
//! point, warm-up points included, so the report lines up one-to-one with the
//! input. [`detect_whole_series`] skips the streaming discipline: one
//! isolation fit over the whole series, then every point scored against it.

use crate::config::{DetectorConfig, EngineConfig, IsolationConfig};
use crate::engine::{CancellationToken, DetectionEngine, RunSummary};
use crate::error::{EngineError, ScoreError, StreamError};
use crate::policy::DecisionPolicy;
use crate::record::{AnomalyRecord, Verdict};
use crate::scorer::{IsolationScorer, Scorer};
use crate::stream::{Observation, StreamSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Consumed to fill the window; never scored.
    Warmup,
    Anomaly,
    Normal,
    Undetermined { reason: String },
}

impl From<Verdict> for EntryStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Anomaly => Self::Anomaly,
            Verdict::Normal => Self::Normal,
            Verdict::Undetermined { reason } => Self::Undetermined { reason },
        }
    }
}

impl EntryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Anomaly => "anomaly",
            Self::Normal => "normal",
            Self::Undetermined { .. } => "undetermined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: EntryStatus,
    pub residual_or_score: Option<f64>,
    pub predicted: Option<f64>,
}

impl BatchEntry {
    fn warmup(observation: &Observation) -> Self {
        Self {
            index: observation.index,
            value: observation.value,
            timestamp: observation.timestamp,
            status: EntryStatus::Warmup,
            residual_or_score: None,
            predicted: None,
        }
    }
}

impl From<AnomalyRecord> for BatchEntry {
    fn from(record: AnomalyRecord) -> Self {
        Self {
            index: record.index,
            value: record.value,
            timestamp: record.timestamp,
            status: record.verdict.into(),
            residual_or_score: record.residual_or_score,
            predicted: record.predicted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub engine: EngineConfig,
    pub summary: RunSummary,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn anomalies(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Anomaly)
    }

    pub fn anomaly_indices(&self) -> Vec<u64> {
        self.anomalies().map(|e| e.index).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Source adapter that remembers every observation it hands out.
struct Recording<'a, S: ?Sized> {
    inner: &'a mut S,
    seen: Vec<Observation>,
}

impl<S: StreamSource + ?Sized> StreamSource for Recording<'_, S> {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        let next = self.inner.next_observation()?;
        if let Some(observation) = &next {
            self.seen.push(*observation);
        }
        Ok(next)
    }
}

/// Run a fresh engine built from `config` over `source` to completion.
pub fn detect_batch<S>(config: &DetectorConfig, source: &mut S) -> Result<BatchReport, EngineError>
where
    S: StreamSource + ?Sized,
{
    let mut engine = DetectionEngine::from_config(config)?;
    let mut recording = Recording {
        inner: source,
        seen: Vec::new(),
    };
    let mut records = Vec::new();
    let summary = engine.run(&mut recording, &CancellationToken::new(), |r| records.push(r))?;

    let mut records = records.into_iter().peekable();
    let entries = recording
        .seen
        .iter()
        .map(|observation| match records.next_if(|r| r.index == observation.index) {
            Some(record) => BatchEntry::from(record),
            None => BatchEntry::warmup(observation),
        })
        .collect();

    let report = BatchReport {
        run_id: Uuid::new_v4(),
        strategy: config.strategy.name().to_string(),
        created_at: Utc::now(),
        engine: config.engine(),
        summary,
        entries,
    };
    info!(
        run_id = %report.run_id,
        points = report.entries.len(),
        anomalies = report.summary.tally.anomalies,
        undetermined = report.summary.tally.undetermined,
        "Batch detection complete"
    );
    Ok(report)
}

pub const WHOLE_SERIES_STRATEGY: &str = "isolation_whole_series";

/// Fit one isolation forest on every value of `source`, then score each value
/// against it. No warm-up: every point gets a verdict. A failed fit marks
/// every point undetermined.
pub fn detect_whole_series<S>(
    config: &IsolationConfig,
    source: &mut S,
) -> Result<BatchReport, EngineError>
where
    S: StreamSource + ?Sized,
{
    config.validate()?;

    let mut observations = Vec::new();
    while let Some(observation) = source
        .next_observation()
        .map_err(|last| EngineError::SourceFailed {
            consecutive: 1,
            last,
        })?
    {
        observations.push(observation);
    }
    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();

    let mut scorer = IsolationScorer::new(config);
    let fitted = scorer.fit(&values);
    let mut policy = DecisionPolicy::new();
    let entries = observations
        .iter()
        .map(|observation| {
            let outcome = match &fitted {
                Ok(()) => scorer.score(&values, observation.value),
                Err(e) => Err(ScoreError::Fit(e.clone())),
            };
            BatchEntry::from(policy.decide(observation, outcome))
        })
        .collect();

    let points = observations.len();
    let report = BatchReport {
        run_id: Uuid::new_v4(),
        strategy: WHOLE_SERIES_STRATEGY.to_string(),
        created_at: Utc::now(),
        engine: EngineConfig {
            window_size: points,
            refit_cadence: points.max(1),
            max_source_errors: 1,
        },
        summary: RunSummary {
            observed: points as u64,
            warmup: 0,
            tally: policy.tally(),
            fits: u64::from(fitted.is_ok()),
            fit_failures: u64::from(fitted.is_err()),
            source_errors: 0,
            cancelled: false,
        },
        entries,
    };
    info!(
        run_id = %report.run_id,
        points,
        contamination = config.contamination,
        anomalies = report.summary.tally.anomalies,
        "Whole-series detection complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::stream::ValueStream;

    fn wavy(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| (t as f64 * 0.7).sin() + 0.3 * (t as f64 * 2.3).cos())
            .collect()
    }

    #[test]
    fn test_one_entry_per_input_point() {
        let mut config = DetectorConfig::for_strategy(StrategyKind::Forecast);
        config.window_size = Some(20);
        let report = detect_batch(&config, &mut ValueStream::new(wavy(60))).unwrap();

        assert_eq!(report.entries.len(), 60);
        assert!(report.entries[..20].iter().all(|e| e.status == EntryStatus::Warmup));
        assert!(report.entries[20..].iter().all(|e| e.status != EntryStatus::Warmup));
        assert_eq!(report.summary.tally.total(), 40);
        assert!(report.entries.iter().enumerate().all(|(i, e)| e.index == i as u64));
    }

    #[test]
    fn test_undetermined_entries_are_distinct_in_json() {
        let mut config = DetectorConfig::for_strategy(StrategyKind::Forecast);
        config.window_size = Some(20);
        let report = detect_batch(&config, &mut ValueStream::new(vec![2.0; 25])).unwrap();

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 25);
        assert_eq!(entries[0]["status"], "warmup");
        assert_eq!(entries[24]["status"], "undetermined");
        assert!(entries[24]["reason"].as_str().unwrap().contains("variation"));
        assert!(report.anomaly_indices().is_empty());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut config = DetectorConfig::default();
        config.forecast.threshold = -1.0;
        let err = detect_batch(&config, &mut ValueStream::new(wavy(10))).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_whole_series_scores_every_point() {
        let mut values = wavy(300);
        values[42] = 25.0;
        values[250] = -25.0;

        let report =
            detect_whole_series(&IsolationConfig::whole_series(), &mut ValueStream::new(values))
                .unwrap();

        assert_eq!(report.entries.len(), 300);
        assert_eq!(report.summary.warmup, 0);
        assert_eq!(report.summary.fits, 1);
        assert_eq!(report.summary.tally.total(), 300);
        assert!(report.entries.iter().all(|e| e.status != EntryStatus::Warmup));

        let flagged = report.anomaly_indices();
        assert!(flagged.contains(&42) && flagged.contains(&250), "{flagged:?}");
        // Roughly the contamination share of 300 points.
        assert!(flagged.len() <= 10, "{flagged:?}");
    }

    #[test]
    fn test_whole_series_fit_failure_is_undetermined() {
        let report =
            detect_whole_series(&IsolationConfig::whole_series(), &mut ValueStream::new(vec![1.0]))
                .unwrap();
        assert_eq!(report.summary.fit_failures, 1);
        assert!(matches!(
            report.entries[0].status,
            EntryStatus::Undetermined { .. }
        ));
    }

    #[test]
    fn test_run_ids_differ() {
        let config = DetectorConfig::default();
        let a = detect_batch(&config, &mut ValueStream::new(wavy(10))).unwrap();
        let b = detect_batch(&config, &mut ValueStream::new(wavy(10))).unwrap();
        assert_ne!(a.run_id, b.run_id);
    }
}

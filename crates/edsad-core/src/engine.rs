//! Detection Engine
//!
//! Step-driven state machine around one scorer and one window buffer:
//!
//! ```text
//! Warmup ──(buffer ready)──▶ Active ──(end of stream | cancel)──▶ Terminated
//! ```
//!
//! An active step appends to the buffer, checks the refit cadence, refits if
//! due, scores, and emits exactly one record. Where the append happens
//! depends on the scorer's [`FitWindow`]: forecast scoring needs the window
//! strictly before the candidate, so the candidate joins the buffer after it
//! is scored.

use crate::config::{DetectorConfig, EngineConfig};
use crate::error::{ConfigError, EngineError, FitError, ScoreError, StreamError};
use crate::policy::DecisionPolicy;
use crate::record::{AnomalyRecord, VerdictTally};
use crate::scheduler::RetrainScheduler;
use crate::scorer::{FitWindow, Scorer, build_scorer};
use crate::stream::{Observation, StreamSource};
use crate::window::WindowBuffer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

// ============================================================================
// STATE & CANCELLATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Warmup,
    Active,
    Terminated,
}

/// Cooperative cancellation flag, checked between points.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Totals for a finished (or failed) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub observed: u64,
    pub warmup: u64,
    pub tally: VerdictTally,
    pub fits: u64,
    pub fit_failures: u64,
    pub source_errors: u64,
    pub cancelled: bool,
}

// ============================================================================
// ENGINE
// ============================================================================

pub type DynEngine = DetectionEngine<Box<dyn Scorer>>;

pub struct DetectionEngine<S: Scorer> {
    config: EngineConfig,
    scorer: S,
    buffer: WindowBuffer,
    scheduler: RetrainScheduler,
    policy: DecisionPolicy,
    state: EngineState,
    observed: u64,
    warmup: u64,
    /// Points scored since the engine became active.
    offset: u64,
    source_errors: u64,
    cancelled: bool,
}

impl DetectionEngine<Box<dyn Scorer>> {
    /// Validated engine for the configured strategy.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_scorer(config.engine(), build_scorer(config)))
    }
}

impl<S: Scorer> DetectionEngine<S> {
    pub fn new(config: EngineConfig, scorer: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_scorer(config, scorer))
    }

    fn with_scorer(config: EngineConfig, scorer: S) -> Self {
        Self {
            buffer: WindowBuffer::new(config.window_size),
            scheduler: RetrainScheduler::new(config.refit_cadence),
            policy: DecisionPolicy::new(),
            state: EngineState::Warmup,
            observed: 0,
            warmup: 0,
            offset: 0,
            source_errors: 0,
            cancelled: false,
            config,
            scorer,
        }
    }

    /// Process one observation. Returns the record for this point, or `None`
    /// while warming up.
    pub fn step(&mut self, observation: Observation) -> Result<Option<AnomalyRecord>, EngineError> {
        if self.state == EngineState::Terminated {
            return Err(EngineError::Terminated);
        }
        self.observed += 1;

        let record = match self.scorer.fit_window() {
            FitWindow::Preceding => self.step_preceding(observation),
            FitWindow::Inclusive => self.step_inclusive(observation),
        };
        if record.is_none() {
            self.warmup += 1;
        }
        Ok(record)
    }

    fn step_preceding(&mut self, observation: Observation) -> Option<AnomalyRecord> {
        if self.state == EngineState::Warmup {
            self.buffer.append(observation);
            if self.buffer.is_ready() {
                self.activate();
            }
            return None;
        }

        let refit = self.refit_if_due();
        let record = self.score(&observation, refit);
        self.buffer.append(observation);
        Some(record)
    }

    fn step_inclusive(&mut self, observation: Observation) -> Option<AnomalyRecord> {
        self.buffer.append(observation);

        if self.state == EngineState::Warmup {
            if self.buffer.is_ready() {
                // Initial fit on the first W points counts as the refit at offset 0.
                let outcome = self.scorer.fit(self.buffer.values());
                self.log_fit(0, &outcome);
                self.scheduler.record(0, outcome.is_ok());
                self.activate();
            }
            return None;
        }

        let refit = self.refit_if_due();
        Some(self.score(&observation, refit))
    }

    fn activate(&mut self) {
        self.state = EngineState::Active;
        info!(
            scorer = self.scorer.name(),
            window = self.config.window_size,
            cadence = self.config.refit_cadence,
            warmup = self.observed,
            "Engine active"
        );
    }

    fn refit_if_due(&mut self) -> Result<(), ScoreError> {
        if !self.scheduler.is_due(self.offset, self.scorer.is_fitted()) {
            return Ok(());
        }
        let outcome = self.scorer.fit(self.buffer.values());
        self.log_fit(self.offset, &outcome);
        self.scheduler.record(self.offset, outcome.is_ok());
        outcome.map_err(ScoreError::from)
    }

    fn log_fit(&self, offset: u64, outcome: &Result<(), FitError>) {
        match outcome {
            Ok(()) => debug!(offset, scorer = self.scorer.name(), "Refit"),
            Err(e) => warn!(offset, scorer = self.scorer.name(), error = %e, "Refit failed"),
        }
    }

    fn score(&mut self, observation: &Observation, refit: Result<(), ScoreError>) -> AnomalyRecord {
        let outcome = match refit {
            Ok(()) => {
                let history = self.buffer.values();
                self.scorer.score(history, observation.value)
            }
            Err(e) => Err(e),
        };
        self.offset += 1;
        self.policy.decide(observation, outcome)
    }

    /// Stop the engine. Further steps fail with [`EngineError::Terminated`].
    pub fn terminate(&mut self) {
        if self.state != EngineState::Terminated {
            info!(
                observed = self.observed,
                anomalies = self.policy.tally().anomalies,
                undetermined = self.policy.tally().undetermined,
                "Engine terminated"
            );
            self.state = EngineState::Terminated;
        }
    }

    /// Drive the engine from `source` until end of stream, cancellation, or a
    /// persistently failing source. Records go to `sink` in emission order.
    pub fn run<Src, F>(
        &mut self,
        source: &mut Src,
        cancel: &CancellationToken,
        mut sink: F,
    ) -> Result<RunSummary, EngineError>
    where
        Src: StreamSource + ?Sized,
        F: FnMut(AnomalyRecord),
    {
        let mut consecutive = 0usize;
        loop {
            if cancel.is_cancelled() {
                self.cancelled = true;
                self.terminate();
                break;
            }
            match source.next_observation() {
                Ok(Some(observation)) => {
                    consecutive = 0;
                    if let Some(record) = self.step(observation)? {
                        sink(record);
                    }
                }
                Ok(None) => {
                    // A queue-backed source may end because the producer saw the cancel first.
                    self.cancelled = cancel.is_cancelled();
                    self.terminate();
                    break;
                }
                Err(e) => {
                    consecutive += 1;
                    self.source_errors += 1;
                    warn!(consecutive, error = %e, "Stream source error");
                    if consecutive >= self.config.max_source_errors {
                        error!(consecutive, "Stream source failed permanently");
                        self.terminate();
                        return Err(source_failed(consecutive, e));
                    }
                }
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            observed: self.observed,
            warmup: self.warmup,
            tally: self.policy.tally(),
            fits: self.scheduler.fits(),
            fit_failures: self.scheduler.failures(),
            source_errors: self.source_errors,
            cancelled: self.cancelled,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Points scored since activation.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get_stats(&self) -> String {
        format!(
            "state={:?} observed={} fits={} failures={} | {}",
            self.state,
            self.observed,
            self.scheduler.fits(),
            self.scheduler.failures(),
            self.scorer.get_stats()
        )
    }
}

fn source_failed(consecutive: usize, last: StreamError) -> EngineError {
    EngineError::SourceFailed { consecutive, last }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IsolationConfig, StrategyKind};
    use crate::record::Verdict;
    use crate::scorer::{ForecastScorer, IsolationScorer};
    use crate::stream::ValueStream;

    fn wavy(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| (t as f64 * 0.7).sin() + 0.3 * (t as f64 * 2.3).cos())
            .collect()
    }

    fn collect<S: Scorer>(engine: &mut DetectionEngine<S>, values: Vec<f64>) -> Vec<AnomalyRecord> {
        let mut records = Vec::new();
        engine
            .run(&mut ValueStream::new(values), &CancellationToken::new(), |r| {
                records.push(r)
            })
            .unwrap();
        records
    }

    struct FailingSource;

    impl StreamSource for FailingSource {
        fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
            Err(StreamError::Unavailable("sensor offline".into()))
        }
    }

    #[test]
    fn test_one_record_per_point_after_warmup_forecast() {
        let config = EngineConfig::for_strategy(StrategyKind::Forecast).with_window_size(20);
        let mut engine = DetectionEngine::new(config, ForecastScorer::default()).unwrap();
        let records = collect(&mut engine, wavy(45));

        assert_eq!(records.len(), 25);
        assert_eq!(records.first().unwrap().index, 20);
        assert_eq!(records.last().unwrap().index, 44);
        assert!(records.windows(2).all(|w| w[1].index == w[0].index + 1));
        assert_eq!(engine.summary().warmup, 20);
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn test_one_record_per_point_after_warmup_isolation() {
        let config = EngineConfig::for_strategy(StrategyKind::Isolation).with_window_size(30);
        let mut engine = DetectionEngine::new(config, IsolationScorer::default()).unwrap();
        let records = collect(&mut engine, wavy(50));

        assert_eq!(records.len(), 20);
        assert_eq!(records.first().unwrap().index, 30);
    }

    #[test]
    fn test_short_stream_emits_nothing() {
        let mut engine = DetectionEngine::from_config(&DetectorConfig::default()).unwrap();
        let records = collect(&mut engine, wavy(10));
        assert!(records.is_empty());
        assert_eq!(engine.summary().warmup, 10);
    }

    #[test]
    fn test_warmup_to_active_transition() {
        let config = EngineConfig::for_strategy(StrategyKind::Forecast).with_window_size(10);
        let mut engine = DetectionEngine::new(config, ForecastScorer::default()).unwrap();
        for (i, v) in wavy(10).into_iter().enumerate() {
            assert_eq!(engine.state(), EngineState::Warmup);
            assert!(engine.step(Observation::new(i as u64, v)).unwrap().is_none());
        }
        assert_eq!(engine.state(), EngineState::Active);
        assert!(engine.step(Observation::new(10, 0.0)).unwrap().is_some());
    }

    #[test]
    fn test_constant_window_is_undetermined() {
        let config = EngineConfig::for_strategy(StrategyKind::Forecast).with_window_size(20);
        let mut engine = DetectionEngine::new(config, ForecastScorer::default()).unwrap();
        let records = collect(&mut engine, vec![3.0; 25]);

        assert_eq!(records.len(), 5);
        for record in &records {
            match &record.verdict {
                Verdict::Undetermined { reason } => assert!(reason.contains("variation")),
                other => panic!("expected undetermined, got {other}"),
            }
        }
        assert_eq!(engine.summary().tally.undetermined, 5);
        assert_eq!(engine.summary().fit_failures, 5);
    }

    #[test]
    fn test_recovers_after_degenerate_stretch() {
        let config = EngineConfig::for_strategy(StrategyKind::Forecast).with_window_size(20);
        let mut engine = DetectionEngine::new(config, ForecastScorer::default()).unwrap();
        let mut values = vec![1.0; 20];
        values.extend(wavy(40));
        let records = collect(&mut engine, values);

        assert!(records.first().unwrap().verdict.is_undetermined());
        assert!(!records.last().unwrap().verdict.is_undetermined());
    }

    #[test]
    fn test_isolation_state_changes_only_on_cadence() {
        let config = EngineConfig::for_strategy(StrategyKind::Isolation)
            .with_window_size(40)
            .with_refit_cadence(5);
        let mut engine = DetectionEngine::new(config, IsolationScorer::default()).unwrap();
        let values = wavy(80);

        for (i, v) in values[..40].iter().enumerate() {
            engine.step(Observation::new(i as u64, *v)).unwrap();
        }
        let mut previous = engine.scorer().checkpoint().unwrap();

        for (i, v) in values[40..].iter().enumerate() {
            let offset = engine.offset();
            engine.step(Observation::new(40 + i as u64, *v)).unwrap();
            let current = engine.scorer().checkpoint().unwrap();
            if offset % 5 == 0 && offset > 0 {
                assert_ne!(current, previous, "expected refit at offset {offset}");
            } else {
                assert_eq!(current, previous, "unexpected refit at offset {offset}");
            }
            previous = current;
        }
        assert_eq!(engine.summary().fits, 8);
    }

    #[test]
    fn test_repeated_scores_identical_between_refits() {
        let config = EngineConfig::for_strategy(StrategyKind::Isolation).with_window_size(40);
        let mut engine = DetectionEngine::new(config, IsolationScorer::default()).unwrap();
        for (i, v) in wavy(40).into_iter().enumerate() {
            engine.step(Observation::new(i as u64, v)).unwrap();
        }
        let first = engine.scorer().score(&[], 0.25).unwrap();
        let second = engine.scorer().score(&[], 0.25).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let mut config = DetectorConfig::for_strategy(StrategyKind::Isolation);
        config.window_size = Some(30);
        config.isolation = IsolationConfig {
            n_trees: 20,
            ..IsolationConfig::default()
        };
        let values = wavy(90);

        let mut a = DetectionEngine::from_config(&config).unwrap();
        let mut b = DetectionEngine::from_config(&config).unwrap();
        assert_eq!(collect(&mut a, values.clone()), collect(&mut b, values));
    }

    #[test]
    fn test_terminated_engine_rejects_steps() {
        let mut engine = DetectionEngine::from_config(&DetectorConfig::default()).unwrap();
        engine.terminate();
        assert!(matches!(
            engine.step(Observation::new(0, 1.0)),
            Err(EngineError::Terminated)
        ));
    }

    #[test]
    fn test_cancelled_before_first_point() {
        let mut engine = DetectionEngine::from_config(&DetectorConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = engine
            .run(&mut ValueStream::new(wavy(100)), &cancel, |_| {
                panic!("no records after cancellation")
            })
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.observed, 0);
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn test_persistent_source_failure_is_fatal() {
        let mut engine = DetectionEngine::from_config(&DetectorConfig::default()).unwrap();
        let err = engine
            .run(&mut FailingSource, &CancellationToken::new(), |_| {})
            .unwrap_err();

        match err {
            EngineError::SourceFailed { consecutive, .. } => assert_eq!(consecutive, 3),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(engine.state(), EngineState::Terminated);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig::for_strategy(StrategyKind::Forecast).with_refit_cadence(0);
        assert!(DetectionEngine::new(config, ForecastScorer::default()).is_err());
    }
}

//! Streaming anomaly detection over univariate numeric series.
//!
//! A [`DetectionEngine`] pulls [`Observation`]s from a [`StreamSource`],
//! keeps a trailing [`WindowBuffer`], refits its [`Scorer`] on a cadence and
//! emits one [`AnomalyRecord`] per point once warmed up.

pub mod algo;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod live;
pub mod policy;
pub mod record;
pub mod report;
pub mod scheduler;
pub mod scorer;
pub mod stream;
pub mod window;

pub use config::{DetectorConfig, EngineConfig, ForecastConfig, IsolationConfig, StrategyKind};
pub use engine::{CancellationToken, DetectionEngine, DynEngine, EngineState, RunSummary};
pub use error::{ConfigError, EngineError, FitError, ScoreError, StreamError};
pub use live::{LiveError, LiveSession};
pub use record::{AnomalyRecord, Verdict, VerdictTally};
pub use report::{BatchEntry, BatchReport, EntryStatus, detect_batch, detect_whole_series};
pub use scorer::{FitWindow, ForecastScorer, IsolationScorer, ScoreResult, Scorer};
pub use stream::{Observation, StreamSource, ValueStream};
pub use window::WindowBuffer;

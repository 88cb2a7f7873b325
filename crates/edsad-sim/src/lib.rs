//! # edsad-sim
//!
//! Stream sources and tooling around `edsad-core`:
//!
//! - [`SyntheticSource`]: seeded seasonal generator with anomaly injection and
//!   ground truth.
//! - [`CsvSource`]: one CSV column, mean-imputed, as a finite stream.
//! - [`evaluation`]: precision / recall / F1 against injected anomalies.
//!
//! ```rust,no_run
//! use edsad_core::{DetectorConfig, detect_batch};
//! use edsad_sim::{GeneratorConfig, SyntheticSource};
//!
//! let mut source = SyntheticSource::new(GeneratorConfig::default().with_limit(500)).unwrap();
//! let report = detect_batch(&DetectorConfig::default(), &mut source).unwrap();
//! let eval = edsad_sim::evaluate_report(&report, source.ground_truth());
//! println!("f1 = {:.3}", eval.f1);
//! ```

pub mod csv_source;
pub mod evaluation;
pub mod generator;

pub use csv_source::{CsvSource, SourceError};
pub use evaluation::{Evaluation, calculate_metrics, evaluate_records, evaluate_report};
pub use generator::{GeneratorConfig, GeneratorError, Harmonic, Injection, SyntheticSource};

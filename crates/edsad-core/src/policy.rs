//! Anomaly decision policy.
//!
//! Turns a scorer outcome into an [`AnomalyRecord`]. Scorer failures become
//! `Undetermined` records; they are never folded into `Normal`.

use crate::error::ScoreError;
use crate::record::{AnomalyRecord, Verdict, VerdictTally};
use crate::scorer::ScoreResult;
use crate::stream::Observation;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    tally: VerdictTally,
}

impl DecisionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(
        &mut self,
        observation: &Observation,
        outcome: Result<ScoreResult, ScoreError>,
    ) -> AnomalyRecord {
        let record = match outcome {
            Ok(result) => {
                let verdict = if result.is_anomaly() {
                    Verdict::Anomaly
                } else {
                    Verdict::Normal
                };
                AnomalyRecord {
                    residual_or_score: result.diagnostic(),
                    predicted: result.predicted(),
                    ..AnomalyRecord::new(observation, verdict)
                }
            }
            Err(e) => {
                warn!(index = observation.index, error = %e, "Point undetermined");
                AnomalyRecord::new(
                    observation,
                    Verdict::Undetermined {
                        reason: e.to_string(),
                    },
                )
            }
        };
        self.tally.add(&record.verdict);
        record
    }

    pub fn tally(&self) -> VerdictTally {
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;

    #[test]
    fn test_forecast_result_maps_to_record() {
        let mut policy = DecisionPolicy::new();
        let record = policy.decide(
            &Observation::new(120, 6.0),
            Ok(ScoreResult::Forecast {
                predicted: 0.5,
                residual: 5.5,
                is_anomaly: true,
            }),
        );
        assert_eq!(record.verdict, Verdict::Anomaly);
        assert_eq!(record.residual_or_score, Some(5.5));
        assert_eq!(record.predicted, Some(0.5));
        assert_eq!(record.value_if_anomalous(), Some(6.0));
    }

    #[test]
    fn test_fit_error_is_undetermined_not_normal() {
        let mut policy = DecisionPolicy::new();
        let record = policy.decide(
            &Observation::new(3, 1.0),
            Err(ScoreError::Fit(FitError::Degenerate { variance: 0.0 })),
        );
        assert!(record.verdict.is_undetermined());
        assert_ne!(record.verdict, Verdict::Normal);
        assert_eq!(record.residual_or_score, None);
        assert_eq!(policy.tally().undetermined, 1);
        assert_eq!(policy.tally().normals, 0);
    }

    #[test]
    fn test_not_fitted_is_undetermined() {
        let mut policy = DecisionPolicy::new();
        let record = policy.decide(&Observation::new(0, 1.0), Err(ScoreError::NotFitted));
        match record.verdict {
            Verdict::Undetermined { reason } => assert!(reason.contains("not fitted")),
            other => panic!("expected undetermined, got {other}"),
        }
    }
}

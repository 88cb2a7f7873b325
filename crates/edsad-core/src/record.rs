//! Per-point detection output.

use crate::stream::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-way outcome for a scored point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Anomaly,
    Normal,
    /// The scorer could not produce a decision for this point.
    Undetermined { reason: String },
}

impl Verdict {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Self::Anomaly)
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, Self::Undetermined { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Normal => "normal",
            Self::Undetermined { .. } => "undetermined",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undetermined { reason } => write!(f, "undetermined ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One record per point processed while the engine is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub index: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    /// Forecast residual or isolation score, when one was computed.
    pub residual_or_score: Option<f64>,
    /// One-step forecast (forecast strategy only).
    pub predicted: Option<f64>,
}

impl AnomalyRecord {
    pub fn new(observation: &Observation, verdict: Verdict) -> Self {
        Self {
            index: observation.index,
            value: observation.value,
            timestamp: observation.timestamp,
            verdict,
            residual_or_score: None,
            predicted: None,
        }
    }

    /// The observed value when the point was flagged, `None` otherwise.
    pub fn value_if_anomalous(&self) -> Option<f64> {
        self.verdict.is_anomaly().then_some(self.value)
    }
}

/// Verdict counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictTally {
    pub anomalies: u64,
    pub normals: u64,
    pub undetermined: u64,
}

impl VerdictTally {
    pub fn add(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Anomaly => self.anomalies += 1,
            Verdict::Normal => self.normals += 1,
            Verdict::Undetermined { .. } => self.undetermined += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.anomalies + self.normals + self.undetermined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_if_anomalous() {
        let obs = Observation::new(7, 3.5);
        assert_eq!(
            AnomalyRecord::new(&obs, Verdict::Anomaly).value_if_anomalous(),
            Some(3.5)
        );
        assert_eq!(
            AnomalyRecord::new(&obs, Verdict::Normal).value_if_anomalous(),
            None
        );
        let undetermined = Verdict::Undetermined {
            reason: "scorer not fitted".into(),
        };
        assert_eq!(
            AnomalyRecord::new(&obs, undetermined).value_if_anomalous(),
            None
        );
    }

    #[test]
    fn test_verdict_json_keeps_three_variants_apart() {
        let normal = serde_json::to_value(Verdict::Normal).unwrap();
        let undetermined = serde_json::to_value(Verdict::Undetermined {
            reason: "degenerate".into(),
        })
        .unwrap();

        assert_eq!(normal["kind"], "normal");
        assert_eq!(undetermined["kind"], "undetermined");
        assert_eq!(undetermined["reason"], "degenerate");
        assert_ne!(normal, undetermined);
    }

    #[test]
    fn test_tally() {
        let mut tally = VerdictTally::default();
        tally.add(&Verdict::Anomaly);
        tally.add(&Verdict::Normal);
        tally.add(&Verdict::Normal);
        tally.add(&Verdict::Undetermined { reason: String::new() });
        assert_eq!((tally.anomalies, tally.normals, tally.undetermined), (1, 2, 1));
        assert_eq!(tally.total(), 4);
    }
}

//! Checkpoint and restore of fitted scorer state.
//!
//! Scorers serialize their fitted model with bincode inside a versioned
//! envelope. The envelope names the scorer so state cannot be restored into a
//! scorer of a different strategy.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version for checkpoint format migrations
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerCheckpoint {
    pub version: u32,
    pub scorer: String,
    /// bincode of the scorer's fitted state; `None` when not fitted.
    pub state: Option<Vec<u8>>,
}

impl ScorerCheckpoint {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: ScorerCheckpoint = bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                max_supported: CHECKPOINT_VERSION,
            });
        }
        Ok(checkpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("unsupported checkpoint version: {found} (max supported: {max_supported})")]
    UnsupportedVersion { found: u32, max_supported: u32 },

    #[error("checkpoint belongs to scorer {found}, expected {expected}")]
    ScorerMismatch { expected: String, found: String },
}

pub(crate) fn encode<T: Serialize>(scorer: &str, state: Option<&T>) -> Result<Vec<u8>, CheckpointError> {
    let state = state
        .map(|s| {
            bincode::serialize(s).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
        })
        .transpose()?;
    ScorerCheckpoint {
        version: CHECKPOINT_VERSION,
        scorer: scorer.to_string(),
        state,
    }
    .to_bytes()
}

pub(crate) fn decode<T: DeserializeOwned>(
    scorer: &str,
    bytes: &[u8],
) -> Result<Option<T>, CheckpointError> {
    let checkpoint = ScorerCheckpoint::from_bytes(bytes)?;
    if checkpoint.scorer != scorer {
        return Err(CheckpointError::ScorerMismatch {
            expected: scorer.to_string(),
            found: checkpoint.scorer,
        });
    }
    checkpoint
        .state
        .map(|raw| {
            bincode::deserialize(&raw)
                .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rejects_newer_version() {
        let bytes = ScorerCheckpoint {
            version: CHECKPOINT_VERSION + 1,
            scorer: "forecast".to_string(),
            state: None,
        }
        .to_bytes()
        .unwrap();

        assert_eq!(
            ScorerCheckpoint::from_bytes(&bytes).unwrap_err(),
            CheckpointError::UnsupportedVersion {
                found: CHECKPOINT_VERSION + 1,
                max_supported: CHECKPOINT_VERSION
            }
        );
    }

    #[test]
    fn test_decode_rejects_other_scorer() {
        let bytes = encode("isolation", Some(&vec![1.0f64, 2.0])).unwrap();
        let err = decode::<Vec<f64>>("forecast", &bytes).unwrap_err();
        assert!(matches!(err, CheckpointError::ScorerMismatch { .. }));
    }

    #[test]
    fn test_unfitted_state_survives() {
        let bytes = encode::<Vec<f64>>("forecast", None).unwrap();
        assert_eq!(decode::<Vec<f64>>("forecast", &bytes).unwrap(), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = ScorerCheckpoint::from_bytes(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, CheckpointError::DeserializationFailed(_)));
    }
}

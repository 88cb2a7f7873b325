//! Observations and the stream source seam.

use crate::error::StreamError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One numeric observation at a logical time step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub index: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(index: u64, value: f64) -> Self {
        Self {
            index,
            value,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Ordered, append-only producer of observations.
///
/// `Ok(None)` signals end of stream. An `Err` means this pull produced
/// nothing; the caller may pull again.
pub trait StreamSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError>;
}

impl<S: StreamSource + ?Sized> StreamSource for Box<S> {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        (**self).next_observation()
    }
}

/// Finite in-memory series, indexed from zero.
#[derive(Debug, Clone)]
pub struct ValueStream {
    values: std::vec::IntoIter<f64>,
    next_index: u64,
}

impl ValueStream {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into_iter(),
            next_index: 0,
        }
    }
}

impl From<Vec<f64>> for ValueStream {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

impl StreamSource for ValueStream {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        Ok(self.values.next().map(|value| {
            let obs = Observation::new(self.next_index, value);
            self.next_index += 1;
            obs
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_stream_indexes_in_order() {
        let mut stream = ValueStream::new(vec![1.5, 2.5]);
        assert_eq!(
            stream.next_observation().unwrap(),
            Some(Observation::new(0, 1.5))
        );
        assert_eq!(
            stream.next_observation().unwrap(),
            Some(Observation::new(1, 2.5))
        );
        assert_eq!(stream.next_observation().unwrap(), None);
        assert_eq!(stream.next_observation().unwrap(), None);
    }
}

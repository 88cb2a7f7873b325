//! Finite-batch source over one CSV column.
//!
//! The whole column is read up front so missing values can be imputed with
//! the column mean before any point reaches the engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use edsad_core::{Observation, StreamError, StreamSource};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("row {row}: cannot parse timestamp '{raw}'")]
    Timestamp { row: usize, raw: String },

    #[error("column '{0}' has no numeric values")]
    NoNumericData(String),
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    observations: Vec<Observation>,
    position: usize,
    imputed: usize,
}

impl CsvSource {
    pub fn from_path(
        path: impl AsRef<Path>,
        value_column: &str,
        timestamp_column: Option<&str>,
    ) -> Result<Self, SourceError> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_csv(reader, value_column, timestamp_column)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        value_column: &str,
        timestamp_column: Option<&str>,
    ) -> Result<Self, SourceError> {
        Self::from_csv(csv::Reader::from_reader(reader), value_column, timestamp_column)
    }

    fn from_csv<R: Read>(
        mut reader: csv::Reader<R>,
        value_column: &str,
        timestamp_column: Option<&str>,
    ) -> Result<Self, SourceError> {
        let headers = reader.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| SourceError::MissingColumn(name.to_string()))
        };
        let value_idx = position(value_column)?;
        let ts_idx = timestamp_column.map(position).transpose()?;

        let mut raw_values = Vec::new();
        let mut timestamps = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            raw_values.push(record.get(value_idx).and_then(parse_value));
            if let Some(idx) = ts_idx {
                let raw = record.get(idx).unwrap_or_default();
                let ts = parse_timestamp(raw).ok_or_else(|| SourceError::Timestamp {
                    row,
                    raw: raw.to_string(),
                })?;
                timestamps.push(ts);
            }
        }

        let present: Vec<f64> = raw_values.iter().flatten().copied().collect();
        if present.is_empty() {
            return Err(SourceError::NoNumericData(value_column.to_string()));
        }
        let fill = present.iter().sum::<f64>() / present.len() as f64;
        let imputed = raw_values.len() - present.len();

        let observations = raw_values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let observation = Observation::new(i as u64, value.unwrap_or(fill));
                match timestamps.get(i) {
                    Some(ts) => observation.with_timestamp(*ts),
                    None => observation,
                }
            })
            .collect::<Vec<_>>();

        info!(
            column = value_column,
            rows = observations.len(),
            imputed,
            fill,
            "Loaded CSV series"
        );
        Ok(Self {
            observations,
            position: 0,
            imputed,
        })
    }

    /// Number of missing values replaced by the column mean.
    pub fn imputed(&self) -> usize {
        self.imputed
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }
}

impl StreamSource for CsvSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        let next = self.observations.get(self.position).copied();
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }
}

/// Empty, unparseable and non-finite cells count as missing.
fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMAND: &str = "\
datetime,nat_demand,T2M_toc
2020-01-03 01:00:00,970.3450,25.8
2020-01-03 02:00:00,,25.6
2020-01-03 03:00:00,898.1992,25.4
2020-01-03 04:00:00,NaN,25.2
2020-01-03 05:00:00,1000.0,25.1
";

    #[test]
    fn test_missing_values_take_column_mean() {
        let mut source =
            CsvSource::from_reader(DEMAND.as_bytes(), "nat_demand", Some("datetime")).unwrap();
        assert_eq!(source.len(), 5);
        assert_eq!(source.imputed(), 2);

        let mean = (970.3450 + 898.1992 + 1000.0) / 3.0;
        let values = source.values();
        assert!((values[1] - mean).abs() < 1e-9);
        assert!((values[3] - mean).abs() < 1e-9);

        let first = source.next_observation().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(
            first.timestamp.unwrap().to_rfc3339(),
            "2020-01-03T01:00:00+00:00"
        );
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = CsvSource::from_reader(DEMAND.as_bytes(), "load", None).unwrap_err();
        assert!(matches!(err, SourceError::MissingColumn(c) if c == "load"));
    }

    #[test]
    fn test_bad_timestamp_is_reported() {
        let raw = "ts,value\nyesterday,1.0\n";
        let err = CsvSource::from_reader(raw.as_bytes(), "value", Some("ts")).unwrap_err();
        assert!(matches!(err, SourceError::Timestamp { row: 0, .. }));
    }

    #[test]
    fn test_column_without_numbers_is_rejected() {
        let raw = "value\n\nfoo\n";
        let err = CsvSource::from_reader(raw.as_bytes(), "value", None).unwrap_err();
        assert!(matches!(err, SourceError::NoNumericData(_)));
    }

    #[test]
    fn test_stream_ends_after_last_row() {
        let mut source = CsvSource::from_reader(DEMAND.as_bytes(), "T2M_toc", None).unwrap();
        let mut seen = 0;
        while source.next_observation().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
        assert!(source.next_observation().unwrap().is_none());
    }
}

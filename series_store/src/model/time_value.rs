//! A single value of the time column, kept in its native representation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tz::{self, Detected, TimeParser};

/// One time-axis value.
///
/// Numbers stay numbers (sample indices, epoch offsets, seconds), only cells
/// that look like timestamps become [`TimeValue::Timestamp`]. Anything else
/// is carried as text and treated as non-numeric by the spectrum code.
///
/// Serialized untagged: numbers as JSON numbers, timestamps as RFC-3339
/// strings, labels as plain strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    /// Finite number.
    Number(f64),
    /// UTC instant.
    Timestamp(DateTime<Utc>),
    /// Opaque label (e.g., "Q1").
    Text(String),
}

/// Why a raw time cell was rejected.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TimeCellError {
    Empty,
    Unresolvable(String),
}

impl TimeValue {
    /// Classifies a raw cell: finite number, then timestamp, then text.
    pub(crate) fn classify(raw: &str, parser: &TimeParser) -> Result<Self, TimeCellError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(TimeCellError::Empty);
        }
        if let Ok(n) = s.parse::<f64>() {
            if n.is_finite() {
                return Ok(TimeValue::Number(n));
            }
        }
        match parser.detect(s) {
            Detected::Timestamp(dt) => Ok(TimeValue::Timestamp(dt)),
            Detected::Unresolvable(reason) => Err(TimeCellError::Unresolvable(reason)),
            Detected::NotATimestamp => Ok(TimeValue::Text(s.to_string())),
        }
    }

    /// Decodes the form produced by [`TimeValue::canonical`].
    ///
    /// Canonical timestamps always carry an offset, so the zone of the
    /// default parser never matters here.
    pub fn from_canonical(s: &str) -> Self {
        match Self::classify(s, &TimeParser::default()) {
            Ok(v) => v,
            Err(_) => TimeValue::Text(s.to_string()),
        }
    }

    /// Stable string form used as the database `timestamp` column and for
    /// duplicate detection.
    pub fn canonical(&self) -> String {
        match self {
            TimeValue::Number(n) => n.to_string(),
            TimeValue::Timestamp(dt) => tz::to_rfc3339(*dt),
            TimeValue::Text(s) => s.clone(),
        }
    }

    /// Position on a numeric axis in seconds (numbers are taken as-is).
    ///
    /// `None` for text labels.
    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            TimeValue::Number(n) => Some(*n),
            TimeValue::Timestamp(dt) => {
                Some(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9)
            }
            TimeValue::Text(_) => None,
        }
    }

    /// `true` for [`TimeValue::Timestamp`].
    pub fn is_timestamp(&self) -> bool {
        matches!(self, TimeValue::Timestamp(_))
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<f64> for TimeValue {
    fn from(n: f64) -> Self {
        TimeValue::Number(n)
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeValue::Timestamp(dt)
    }
}

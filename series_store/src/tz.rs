//! Timestamp detection, parsing and formatting.
//!
//! What this module provides:
//! - [`parse_ts_to_utc`]: Parse RFC-3339 timestamps with an explicit offset and convert to UTC.
//! - [`from_local_naive_with_policy`]: Convert a naive local timestamp in an IANA time zone to
//!   UTC, resolving DST gaps and ambiguities via [`DstPolicy`].
//! - [`TimeParser`]: Decides whether a raw cell "looks like" a timestamp and, if so, turns it
//!   into a UTC instant. Cells that are not timestamps are left to the caller.
//! - [`to_rfc3339`] / [`to_rfc3339_micros`]: the two canonical output forms.
//!
//! Notes:
//! - Ambiguous local times happen during “fall back” when a wall time occurs twice.
//! - Nonexistent local times happen during “spring forward” when a wall time is skipped.
//! - Everything persisted is UTC. Naive cells are interpreted in the parser's zone, which is
//!   UTC unless configured otherwise.
//!
//! Recognised shapes (after trimming):
//! - RFC-3339 with offset: "2024-03-10T09:30:00-05:00", "2024-03-10T14:30:00Z"
//! - Naive date-time: "2024-03-10 09:30:00", "2024-03-10T09:30:00.250", "2024/03/10 09:30"
//! - Date only: "2024-03-10", "2024/03/10" (midnight local)

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// RFC-3339 with offset -> UTC.
///
/// Example:
/// - "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
pub fn parse_ts_to_utc(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad rfc3339: {s}"))?;
    Ok(dt.with_timezone(&Utc))
}

/// Policy for handling DST edge cases when converting local naive timestamps to UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstPolicy {
    /// Strict behavior: error on ambiguous (fall-back) or nonexistent (spring-forward) local times.
    #[default]
    Strict,
    /// For ambiguous local times (two possible instants), pick the earliest instant.
    PreferEarliest,
    /// For ambiguous local times (two possible instants), pick the latest instant.
    PreferLatest,
    /// For nonexistent local times (spring-forward gap), shift forward in one-minute
    /// increments until the first valid instant is found (capped at 2 hours).
    ShiftForward,
}

/// Convert a naive local timestamp to UTC using a specific IANA time zone and DST policy.
///
/// Errors:
/// - Returns an error if the time is ambiguous or nonexistent and the chosen policy does not resolve it.
pub fn from_local_naive_with_policy(
    naive: NaiveDateTime,
    tz: Tz,
    policy: DstPolicy,
) -> anyhow::Result<DateTime<Utc>> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) => Ok(dt.with_timezone(&Utc)),
        Ambiguous(a, b) => match policy {
            DstPolicy::PreferEarliest => Ok(a.with_timezone(&Utc)),
            DstPolicy::PreferLatest => Ok(b.with_timezone(&Utc)),
            _ => Err(anyhow::anyhow!("ambiguous local time in {tz}")),
        },
        None => match policy {
            DstPolicy::ShiftForward => {
                let mut t = naive;
                for _ in 0..120 {
                    t += chrono::Duration::minutes(1);
                    if let Single(dt) = tz.from_local_datetime(&t) {
                        return Ok(dt.with_timezone(&Utc));
                    }
                }
                Err(anyhow::anyhow!("nonexistent local time in {tz}"))
            }
            _ => Err(anyhow::anyhow!("nonexistent local time in {tz}")),
        },
    }
}

/// Format a UTC datetime as RFC-3339 using the shortest exact fractional part.
///
/// Used for time values, where precision must survive a round trip.
pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

/// Format a UTC datetime as a fixed-width RFC-3339 string with microsecond precision.
///
/// Fixed width keeps lexical order equal to chronological order, which the
/// database relies on when sorting `created_at`.
pub fn to_rfc3339_micros(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Outcome of looking at one raw cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Detected {
    /// The cell is a timestamp and resolved to this instant.
    Timestamp(DateTime<Utc>),
    /// The cell has a timestamp shape but cannot be placed in the zone.
    Unresolvable(String),
    /// The cell does not look like a timestamp.
    NotATimestamp,
}

/// Recognises timestamp-shaped cells and resolves them to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParser {
    tz: Tz,
    policy: DstPolicy,
}

impl Default for TimeParser {
    fn default() -> Self {
        Self {
            tz: Tz::UTC,
            policy: DstPolicy::Strict,
        }
    }
}

impl TimeParser {
    /// Parser interpreting naive cells in `tz` with `policy`.
    pub fn new(tz: Tz, policy: DstPolicy) -> Self {
        Self { tz, policy }
    }

    /// Parser for an IANA zone name (e.g., "America/New_York").
    pub fn for_zone(tz_name: &str, policy: DstPolicy) -> anyhow::Result<Self> {
        let tz: Tz = tz_name
            .parse()
            .map_err(|e| anyhow::anyhow!("bad tz {tz_name}: {e}"))?;
        Ok(Self::new(tz, policy))
    }

    /// Zone used for naive cells.
    pub fn zone(&self) -> Tz {
        self.tz
    }

    /// Classifies `raw` as a timestamp or not.
    pub fn detect(&self, raw: &str) -> Detected {
        let s = raw.trim();
        // All supported shapes start with a four-digit year.
        if s.len() < 8 || !s.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
            return Detected::NotATimestamp;
        }

        if let Ok(dt) = parse_ts_to_utc(s) {
            return Detected::Timestamp(dt);
        }

        let naive = NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
            .or_else(|| {
                DATE_FORMATS
                    .iter()
                    .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            });

        match naive {
            Some(n) => match from_local_naive_with_policy(n, self.tz, self.policy) {
                Ok(dt) => Detected::Timestamp(dt),
                Err(e) => Detected::Unresolvable(e.to_string()),
            },
            None => Detected::NotATimestamp,
        }
    }
}

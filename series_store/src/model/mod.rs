//! The time-series entity and its construction from raw tabular input.
//!
//! A [`TimeSeries`] is stored column-wise: one time sequence plus one value
//! sequence per value column, all of equal length. Every constructor goes
//! through the same invariant check, so a value of this type always satisfies:
//! - `value_columns` is non-empty, has no duplicates and excludes `time_column`;
//! - every value sequence has exactly as many entries as the time sequence;
//! - time values are unique (by canonical form).
//!
//! Construction entrypoints:
//! - [`TimeSeries::from_table`]: explicit time and value columns.
//! - [`TimeSeries::create`]: optional selections, defaulting to the first
//!   column for time and every other column for values.
//! - [`TimeSeries::from_table_with`]: as `from_table`, with a custom
//!   [`TimeParser`] for naive timestamps.

mod time_value;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    transform::{self, FrequencyDomain, TimeDomain},
    tz::TimeParser,
};

pub use time_value::TimeValue;
use time_value::TimeCellError;

/// Per-column value sequences keyed by column name, in value-column order.
pub type ColumnValues = IndexMap<String, Vec<Option<f64>>>;

/// Raw tabular input as handed over by an upload handler: a header row and
/// string cells. `None` and blank cells are missing values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names in file order.
    pub columns: Vec<String>,
    /// Data rows; each should have one cell per column.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Builds a table from owned parts.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Convenience constructor from string slices; empty strings are missing values.
    pub fn from_strings(columns: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|c| (!c.is_empty()).then(|| c.to_string()))
                        .collect()
                })
                .collect(),
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// One uploaded time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesRecord")]
pub struct TimeSeries {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    time_column: String,
    value_columns: Vec<String>,
    time: Vec<TimeValue>,
    values: ColumnValues,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Unchecked serde mirror of [`TimeSeries`]; validated on the way in.
#[derive(Deserialize)]
struct SeriesRecord {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    time_column: String,
    value_columns: Vec<String>,
    time: Vec<TimeValue>,
    values: ColumnValues,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeriesRecord> for TimeSeries {
    type Error = ValidationError;

    fn try_from(r: SeriesRecord) -> Result<Self, Self::Error> {
        let mut ts = TimeSeries::from_parts(r.time_column, r.value_columns, r.time, r.values)?;
        ts.id = r.id;
        ts.name = r.name;
        ts.description = r.description;
        ts.created_at = r.created_at;
        ts.updated_at = r.updated_at;
        Ok(ts)
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<'a> {
    /// Time value of the row.
    pub time: &'a TimeValue,
    /// One entry per value column, in value-column order.
    pub values: Vec<Option<f64>>,
}

impl TimeSeries {
    /// Builds an entity from raw rows with explicit column selection.
    ///
    /// Naive timestamps are interpreted as UTC.
    pub fn from_table(
        raw: &RawTable,
        time_column: &str,
        value_columns: &[String],
    ) -> Result<Self, ValidationError> {
        Self::from_table_with(raw, time_column, value_columns, &TimeParser::default())
    }

    /// Builds an entity, defaulting omitted selections.
    ///
    /// - `time_column = None` picks the first raw column.
    /// - `value_columns = None` picks every raw column except the time column.
    pub fn create(
        raw: &RawTable,
        time_column: Option<&str>,
        value_columns: Option<&[String]>,
        parser: &TimeParser,
    ) -> Result<Self, ValidationError> {
        let time_column = match time_column {
            Some(c) => c.to_string(),
            None => raw
                .columns
                .first()
                .cloned()
                .ok_or_else(|| ValidationError::MissingTimeColumn {
                    column: String::new(),
                })?,
        };
        let value_columns: Vec<String> = match value_columns {
            Some(v) => v.to_vec(),
            None => raw
                .columns
                .iter()
                .filter(|c| **c != time_column)
                .cloned()
                .collect(),
        };
        Self::from_table_with(raw, &time_column, &value_columns, parser)
    }

    /// Builds an entity from raw rows using `parser` for timestamp cells.
    pub fn from_table_with(
        raw: &RawTable,
        time_column: &str,
        value_columns: &[String],
        parser: &TimeParser,
    ) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for c in &raw.columns {
            if !seen.insert(c.as_str()) {
                return Err(ValidationError::DuplicateRawColumn { column: c.clone() });
            }
        }

        let time_idx =
            raw.column_index(time_column)
                .ok_or_else(|| ValidationError::MissingTimeColumn {
                    column: time_column.to_string(),
                })?;
        let value_idx = select_value_columns(raw, time_column, value_columns)?;

        let width = raw.columns.len();
        let mut time = Vec::with_capacity(raw.rows.len());
        let mut values: ColumnValues = value_columns
            .iter()
            .map(|c| (c.clone(), Vec::with_capacity(raw.rows.len())))
            .collect();

        for (row_no, row) in raw.rows.iter().enumerate() {
            if row.len() != width {
                return Err(ValidationError::RowLength {
                    row: row_no,
                    expected: width,
                    found: row.len(),
                });
            }

            let cell = row[time_idx].as_deref().unwrap_or("");
            let t = TimeValue::classify(cell, parser).map_err(|e| match e {
                TimeCellError::Empty => ValidationError::MissingTimeValue { row: row_no },
                TimeCellError::Unresolvable(reason) => ValidationError::UnresolvableTime {
                    row: row_no,
                    value: cell.to_string(),
                    reason,
                },
            })?;
            time.push(t);

            for (col, &idx) in value_columns.iter().zip(&value_idx) {
                let v = parse_value(row[idx].as_deref(), row_no, col)?;
                if let Some(seq) = values.get_mut(col) {
                    seq.push(v);
                }
            }
        }

        Self::from_parts(time_column.to_string(), value_columns.to_vec(), time, values)
    }

    /// Assembles an entity from column-wise parts, checking every invariant.
    ///
    /// Used when restoring persisted data and by the preprocessing transforms.
    pub fn from_parts(
        time_column: String,
        value_columns: Vec<String>,
        time: Vec<TimeValue>,
        mut values: ColumnValues,
    ) -> Result<Self, ValidationError> {
        check_selection(&time_column, &value_columns)?;

        let mut ordered = ColumnValues::with_capacity(value_columns.len());
        for col in &value_columns {
            let seq = values
                .swap_remove(col)
                .ok_or_else(|| ValidationError::UnknownValueColumn {
                    column: col.clone(),
                })?;
            if seq.len() != time.len() {
                return Err(ValidationError::ColumnLength {
                    column: col.clone(),
                    expected: time.len(),
                    found: seq.len(),
                });
            }
            if let Some(row) = seq.iter().position(|v| v.is_some_and(|x| !x.is_finite())) {
                return Err(ValidationError::NonFiniteValue {
                    row,
                    column: col.clone(),
                });
            }
            ordered.insert(col.clone(), seq);
        }
        if let Some(extra) = values.keys().next() {
            return Err(ValidationError::UnknownValueColumn {
                column: extra.clone(),
            });
        }

        let mut seen = HashSet::with_capacity(time.len());
        for (row, t) in time.iter().enumerate() {
            let key = t.canonical();
            if !seen.insert(key.clone()) {
                return Err(ValidationError::DuplicateTimeValue { row, value: key });
            }
        }

        Ok(Self {
            id: None,
            name: None,
            description: None,
            time_column,
            value_columns,
            time,
            values: ordered,
            created_at: None,
            updated_at: None,
        })
    }

    /// Sets the id (an entity without one gets a generated id on first save).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Copies id, name, description and timestamps from `other`.
    pub(crate) fn with_metadata_of(mut self, other: &TimeSeries) -> Self {
        self.id = other.id.clone();
        self.name = other.name.clone();
        self.description = other.description.clone();
        self.created_at = other.created_at;
        self.updated_at = other.updated_at;
        self
    }

    /// Restores fields that only repositories set.
    pub(crate) fn restore_metadata(
        mut self,
        id: String,
        name: Option<String>,
        description: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.id = Some(id);
        self.name = name;
        self.description = description;
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Marks the entity as persisted under `id`.
    pub(crate) fn stamp(
        &mut self,
        id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) {
        self.id = Some(id);
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
    }

    /// Id, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Display name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Name of the time column.
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Value columns in order.
    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    /// Time column followed by the value columns.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once(self.time_column.clone())
            .chain(self.value_columns.iter().cloned())
            .collect()
    }

    /// Time sequence.
    pub fn time(&self) -> &[TimeValue] {
        &self.time
    }

    /// Value sequences keyed by column.
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// One value column.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// Set by the repository on first save.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Set by the repository on every save.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// `true` when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Row `i`, if in range.
    pub fn row(&self, i: usize) -> Option<Row<'_>> {
        let time = self.time.get(i)?;
        Some(Row {
            time,
            values: self.values.values().map(|seq| seq[i]).collect(),
        })
    }

    /// Rows in order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// Time axis plus aligned value sequences; nulls are kept in place.
    pub fn get_time_domain_data(&self) -> TimeDomain {
        transform::time_domain(&self.time, &self.values)
    }

    /// Magnitude spectrum per value column.
    ///
    /// See [`transform::frequency_domain`] for how the sample spacing is chosen.
    pub fn get_frequency_domain_data(&self) -> FrequencyDomain {
        transform::frequency_domain(&self.time, &self.values)
    }
}

fn check_selection(time_column: &str, value_columns: &[String]) -> Result<(), ValidationError> {
    if value_columns.is_empty() {
        return Err(ValidationError::EmptyValueColumns);
    }
    let mut seen = HashSet::with_capacity(value_columns.len());
    for col in value_columns {
        if col == time_column {
            return Err(ValidationError::TimeColumnSelectedAsValue {
                column: col.clone(),
            });
        }
        if !seen.insert(col.as_str()) {
            return Err(ValidationError::DuplicateValueColumn {
                column: col.clone(),
            });
        }
    }
    Ok(())
}

fn select_value_columns(
    raw: &RawTable,
    time_column: &str,
    value_columns: &[String],
) -> Result<Vec<usize>, ValidationError> {
    check_selection(time_column, value_columns)?;
    value_columns
        .iter()
        .map(|c| {
            raw.column_index(c)
                .ok_or_else(|| ValidationError::UnknownValueColumn { column: c.clone() })
        })
        .collect()
}

fn parse_value(cell: Option<&str>, row: usize, column: &str) -> Result<Option<f64>, ValidationError> {
    let s = match cell.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(s) => s,
    };
    if ["nan", "null", "none", "na"].contains(&s.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(ValidationError::NonNumericValue {
            row,
            column: column.to_string(),
            raw: s.to_string(),
        }),
    }
}

//! Diesel models mapping to the database schema.
//!
//! These types mirror the tables defined in the embedded migrations and in
//! [`crate::schema`]:
//! - [`crate::schema::time_series_metadata`]: one row per series
//! - [`crate::schema::time_series_data_points`]: one row per (time value, value column)
//!
//! Data points reference their series with `ON DELETE CASCADE`.

use diesel::prelude::*;

use crate::schema::*;

/// A row in [`crate::schema::time_series_metadata`].
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = time_series_metadata, check_for_backend(diesel::sqlite::Sqlite))]
pub struct MetadataRow {
    /// Series id.
    pub id: String,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Name of the time column.
    pub time_column: String,
    /// Value columns as a JSON array, in column order.
    pub value_columns: String,
    /// First save, RFC3339 UTC with microseconds.
    pub created_at: String,
    /// Last save, RFC3339 UTC with microseconds.
    pub updated_at: String,
}

/// Insertable form of [`MetadataRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = time_series_metadata)]
pub struct NewMetadata<'a> {
    /// Series id.
    pub id: &'a str,
    /// Optional display name.
    pub name: Option<&'a str>,
    /// Optional description.
    pub description: Option<&'a str>,
    /// Name of the time column.
    pub time_column: &'a str,
    /// JSON array of value columns.
    pub value_columns: &'a str,
    /// RFC3339 UTC.
    pub created_at: &'a str,
    /// RFC3339 UTC.
    pub updated_at: &'a str,
}

/// Replacement metadata for an existing series. `created_at` is left alone.
///
/// `treat_none_as_null` so that clearing a name or description sticks.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = time_series_metadata, treat_none_as_null = true)]
pub struct MetadataChangeset<'a> {
    /// Optional display name.
    pub name: Option<&'a str>,
    /// Optional description.
    pub description: Option<&'a str>,
    /// Name of the time column.
    pub time_column: &'a str,
    /// JSON array of value columns.
    pub value_columns: &'a str,
    /// RFC3339 UTC.
    pub updated_at: &'a str,
}

/// A row in [`crate::schema::time_series_data_points`].
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = time_series_data_points, check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(belongs_to(MetadataRow, foreign_key = time_series_id))]
pub struct DataPointRow {
    /// Synthetic key; insertion order equals row order.
    pub id: i32,
    /// FK to [`MetadataRow::id`].
    pub time_series_id: String,
    /// Canonical form of the time value (see [`crate::model::TimeValue::canonical`]).
    pub timestamp: String,
    /// Value column name.
    pub column_name: String,
    /// Missing values are NULL.
    pub value: Option<f64>,
}

/// Insertable form of [`DataPointRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = time_series_data_points)]
pub struct NewDataPoint<'a> {
    /// FK to [`MetadataRow::id`].
    pub time_series_id: &'a str,
    /// Canonical time value.
    pub timestamp: &'a str,
    /// Value column name.
    pub column_name: &'a str,
    /// Value, or NULL.
    pub value: Option<f64>,
}

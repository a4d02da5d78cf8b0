//! Upload and analysis operations for an outer API layer.
//!
//! [`TimeSeriesService`] owns a cache-decorated repository and the parser
//! used for naive timestamps. It returns semantic errors only; mapping them
//! to transport status codes is the caller's job
//! (see [`Error::is_client_fault`](crate::error::Error::is_client_fault)).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    cache::{CachedRepo, open_cache},
    config::StoreConfig,
    error::Result,
    model::{RawTable, TimeSeries},
    repo::{TimeSeriesRepo, open_repository},
    transform::{FrequencyDomain, TimeDomain},
    tz::TimeParser,
};

/// Which derived view to include in an [`AnalysisResponse`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Time-domain view only.
    #[default]
    Time,
    /// Time-domain and frequency-domain views.
    Frequency,
}

/// One analysed series as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// Series id.
    pub analysis_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Time column followed by value columns.
    pub columns: Vec<String>,
    /// Name of the time column.
    pub time_column: String,
    /// Value columns in order.
    pub value_columns: Vec<String>,
    /// Number of rows.
    pub rows: usize,
    /// Time-domain view.
    pub time_domain: TimeDomain,
    /// Frequency-domain view, present when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_domain: Option<FrequencyDomain>,
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    /// Series id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Name of the time column.
    pub time_column: String,
    /// Value columns in order.
    pub value_columns: Vec<String>,
    /// Number of rows.
    pub rows: usize,
    /// First save.
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&TimeSeries> for SeriesSummary {
    fn from(s: &TimeSeries) -> Self {
        Self {
            id: s.id().unwrap_or_default().to_string(),
            name: s.name().map(str::to_owned),
            description: s.description().map(str::to_owned),
            time_column: s.time_column().to_string(),
            value_columns: s.value_columns().to_vec(),
            rows: s.len(),
            created_at: s.created_at(),
        }
    }
}

/// Upload and analysis entrypoints.
#[derive(Debug)]
pub struct TimeSeriesService<R> {
    repo: CachedRepo<R>,
    parser: TimeParser,
}

impl<R: TimeSeriesRepo> TimeSeriesService<R> {
    /// Service over `repo`, parsing naive timestamps with `parser`.
    pub fn new(repo: CachedRepo<R>, parser: TimeParser) -> Self {
        Self { repo, parser }
    }

    /// The underlying cache-decorated repository.
    pub fn repo(&self) -> &CachedRepo<R> {
        &self.repo
    }

    /// Builds a series from `raw`, saves it and returns its time-domain view.
    ///
    /// Omitted column selections default to the first column for time and
    /// the remaining columns for values.
    pub async fn process_upload(
        &self,
        raw: &RawTable,
        time_column: Option<&str>,
        value_columns: Option<&[String]>,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<AnalysisResponse> {
        let mut series = TimeSeries::create(raw, time_column, value_columns, &self.parser)?;
        if let Some(n) = name {
            series = series.with_name(n);
        }
        if let Some(d) = description {
            series = series.with_description(d);
        }

        let saved = self.repo.save(series).await?;
        info!(id = saved.id().unwrap_or_default(), rows = saved.len(), "upload processed");
        Ok(respond(&saved, saved.get_time_domain_data(), None))
    }

    /// Loads series `id` with the requested views.
    ///
    /// Both views are derived from the one loaded entity, so a concurrent
    /// save can never mix two versions in a response.
    pub async fn get_analysis(&self, id: &str, domain: Domain) -> Result<AnalysisResponse> {
        let series = self.repo.find_by_id(id).await?;
        let td = series.get_time_domain_data();
        let fd = match domain {
            Domain::Time => None,
            Domain::Frequency => Some(self.repo.frequency_domain_of(&series).await?),
        };
        Ok(respond(&series, td, fd))
    }

    /// Every stored series, oldest first.
    pub async fn list(&self) -> Result<Vec<SeriesSummary>> {
        let all = self.repo.find_all().await?;
        Ok(all.iter().map(SeriesSummary::from).collect())
    }

    /// Deletes series `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.repo.delete(id).await
    }
}

/// Builds the backend, cache and parser named by `config`.
pub async fn open_service(
    config: &StoreConfig,
) -> anyhow::Result<TimeSeriesService<Box<dyn TimeSeriesRepo>>> {
    let parser = config.analysis.parser()?;
    let repo = open_repository(config).await?;
    let cached = CachedRepo::new(repo, open_cache(&config.cache), config.cache.ttl())
        .with_offload_threshold(config.analysis.offload_threshold);
    Ok(TimeSeriesService::new(cached, parser))
}

fn respond(
    series: &TimeSeries,
    time_domain: TimeDomain,
    frequency_domain: Option<FrequencyDomain>,
) -> AnalysisResponse {
    AnalysisResponse {
        analysis_id: series.id().unwrap_or_default().to_string(),
        name: series.name().map(str::to_owned),
        columns: series.columns(),
        time_column: series.time_column().to_string(),
        value_columns: series.value_columns().to_vec(),
        rows: series.len(),
        time_domain,
        frequency_domain,
    }
}

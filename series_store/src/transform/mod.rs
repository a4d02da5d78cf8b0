//! Derived views of a time series.
//!
//! - [`TimeDomain`]: the time axis and the value columns aligned by index,
//!   with missing values kept as `null`.
//! - [`FrequencyDomain`]: per value column, the magnitude of the
//!   non-negative-frequency half of the DFT.
//!
//! Both are plain serde types: the cache stores them as JSON and the export
//! helpers render them as CSV.

mod spectrum;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{ColumnValues, TimeValue};

pub use spectrum::{
    FALLBACK_SAMPLE_SPACING, FallbackReason, MIN_SAMPLE_SPACING, SampleSpacing, SpacingSource,
    UNIFORM_TOLERANCE, magnitude_spectrum,
};

/// Time axis plus aligned value sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDomain {
    /// Time values in sampling order.
    pub time: Vec<TimeValue>,
    /// Value sequences, each as long as `time`.
    pub series: IndexMap<String, Vec<Option<f64>>>,
}

/// Magnitude spectra keyed by value column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyDomain {
    /// Frequency of each bin, in cycles per time unit.
    pub frequencies: IndexMap<String, Vec<f64>>,
    /// `|X_k|` for each bin; same length as the matching `frequencies` entry.
    pub amplitudes: IndexMap<String, Vec<f64>>,
    /// Spacing used to place the bins.
    pub sample_spacing: SampleSpacing,
}

impl FrequencyDomain {
    /// Number of bins for `column`, if present.
    pub fn bins(&self, column: &str) -> Option<usize> {
        self.frequencies.get(column).map(Vec::len)
    }
}

/// Builds the time-domain view. Values are cloned as-is, nulls included.
pub fn time_domain(time: &[TimeValue], values: &ColumnValues) -> TimeDomain {
    TimeDomain {
        time: time.to_vec(),
        series: values.clone(),
    }
}

/// Builds the frequency-domain view.
///
/// The sample spacing is derived once from the time axis (see
/// [`SampleSpacing::derive`]). Missing values are dropped before the
/// transform, so a column with `m` non-null values yields `⌊m/2⌋+1` bins.
pub fn frequency_domain(time: &[TimeValue], values: &ColumnValues) -> FrequencyDomain {
    let sample_spacing = SampleSpacing::derive(time);

    let mut frequencies = IndexMap::with_capacity(values.len());
    let mut amplitudes = IndexMap::with_capacity(values.len());
    for (col, seq) in values {
        let samples: Vec<f64> = seq.iter().flatten().copied().collect();
        let (f, a) = magnitude_spectrum(&samples, sample_spacing.dt);
        frequencies.insert(col.clone(), f);
        amplitudes.insert(col.clone(), a);
    }

    FrequencyDomain {
        frequencies,
        amplitudes,
        sample_spacing,
    }
}

//! Rendering of derived views for download.
//!
//! - [`time_domain_csv`]: wide CSV, one row per time value, one column per
//!   value column; missing values are empty cells.
//! - [`frequency_domain_csv`]: long CSV `column,frequency,amplitude`, since
//!   columns with missing values can have different bin counts.
//! - [`to_json`]: any view as a `serde_json::Value`.

use serde::Serialize;
use thiserror::Error;

use crate::transform::{FrequencyDomain, TimeDomain};

/// Export failure.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The CSV writer failed.
    #[error("csv encoding failed")]
    Csv(#[from] csv::Error),

    /// Flushing the CSV buffer failed.
    #[error("csv buffer flush failed")]
    Io(#[from] std::io::Error),

    /// CSV output was not UTF-8.
    #[error("csv output is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON encoding failed.
    #[error("json encoding failed")]
    Json(#[from] serde_json::Error),
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Renders a time-domain view; `time_header` names the first column.
pub fn time_domain_csv(td: &TimeDomain, time_header: &str) -> Result<String, ExportError> {
    let mut w = csv::Writer::from_writer(Vec::new());

    let mut header = Vec::with_capacity(td.series.len() + 1);
    header.push(time_header);
    header.extend(td.series.keys().map(String::as_str));
    w.write_record(&header)?;

    for (i, t) in td.time.iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(t.canonical());
        for seq in td.series.values() {
            record.push(seq.get(i).copied().flatten().map(|v| v.to_string()).unwrap_or_default());
        }
        w.write_record(&record)?;
    }
    finish(w)
}

/// Renders a frequency-domain view in long form.
pub fn frequency_domain_csv(fd: &FrequencyDomain) -> Result<String, ExportError> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(["column", "frequency", "amplitude"])?;
    for (col, freqs) in &fd.frequencies {
        let amps = fd.amplitudes.get(col).map(Vec::as_slice).unwrap_or_default();
        for (f, a) in freqs.iter().zip(amps) {
            let (f, a) = (f.to_string(), a.to_string());
            w.write_record([col.as_str(), f.as_str(), a.as_str()])?;
        }
    }
    finish(w)
}

/// Converts a view (or any serializable value) into a JSON value.
pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ExportError> {
    Ok(serde_json::to_value(value)?)
}

//! Cleaning transforms applied to a [`TimeSeries`] before analysis.
//!
//! Every transform is pure: it returns a new entity carrying the same id,
//! name, description and column selection. Persisting the result is a normal
//! (replace) save. `columns = None` means every value column.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    model::{ColumnValues, TimeSeries},
};

/// How to fill missing values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "value")]
pub enum FillMethod {
    /// Carry the last seen value forward.
    Forward,
    /// Carry the next value backward.
    Backward,
    /// Column mean.
    Mean,
    /// Column median.
    Median,
    /// A fixed value.
    Constant(f64),
}

/// How to rescale values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    /// Scale to `[0, 1]`. Constant columns become 0 (if the constant is 0) or 0.5.
    MinMax,
    /// Subtract the mean, divide by the sample standard deviation.
    ZScore,
    /// Subtract the median, divide by the interquartile range.
    Robust,
    /// Natural log, shifted by `|min| + 1` when non-positive values exist.
    Log,
}

/// How to detect outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Outside `[Q1 - k*IQR, Q3 + k*IQR]`.
    Iqr,
    /// `|z| > k`.
    ZScore,
}

impl TimeSeries {
    /// Fills missing values. `limit` caps how many consecutive gaps a
    /// forward/backward fill may cover; it is ignored by the other methods.
    pub fn fill_missing(
        &self,
        columns: Option<&[String]>,
        method: FillMethod,
        limit: Option<usize>,
    ) -> Result<TimeSeries, ValidationError> {
        self.map_columns(columns, |seq| fill(seq, method, limit))
    }

    /// Rescales values; nulls stay null.
    pub fn normalize(
        &self,
        columns: Option<&[String]>,
        method: NormalizeMethod,
    ) -> Result<TimeSeries, ValidationError> {
        self.map_columns(columns, |seq| normalize(seq, method))
    }

    /// Drops every row where a selected column holds an outlier. Nulls are
    /// never outliers.
    pub fn remove_outliers(
        &self,
        columns: Option<&[String]>,
        method: OutlierMethod,
        threshold: f64,
    ) -> Result<TimeSeries, ValidationError> {
        let selected = self.selected(columns)?;
        let mut keep = vec![true; self.len()];
        for col in &selected {
            let seq = &self.values()[col.as_str()];
            let Some((lo, hi)) = bounds(seq, method, threshold) else {
                continue;
            };
            for (k, v) in keep.iter_mut().zip(seq) {
                if let Some(x) = v {
                    if *x < lo || *x > hi {
                        *k = false;
                    }
                }
            }
        }

        let time = self
            .time()
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(t, _)| t.clone())
            .collect();
        let values: ColumnValues = self
            .values()
            .iter()
            .map(|(c, seq)| {
                let kept = seq
                    .iter()
                    .zip(&keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| *v)
                    .collect();
                (c.clone(), kept)
            })
            .collect();
        self.rebuild(time, values)
    }

    fn selected(&self, columns: Option<&[String]>) -> Result<Vec<String>, ValidationError> {
        match columns {
            None => Ok(self.value_columns().to_vec()),
            Some(cols) => cols
                .iter()
                .map(|c| {
                    if self.values().contains_key(c) {
                        Ok(c.clone())
                    } else {
                        Err(ValidationError::UnknownValueColumn { column: c.clone() })
                    }
                })
                .collect(),
        }
    }

    fn map_columns<F>(&self, columns: Option<&[String]>, f: F) -> Result<TimeSeries, ValidationError>
    where
        F: Fn(&[Option<f64>]) -> Vec<Option<f64>>,
    {
        let selected = self.selected(columns)?;
        let values: IndexMap<String, Vec<Option<f64>>> = self
            .values()
            .iter()
            .map(|(c, seq)| {
                let out = if selected.contains(c) { f(seq) } else { seq.clone() };
                (c.clone(), out)
            })
            .collect();
        self.rebuild(self.time().to_vec(), values)
    }

    fn rebuild(
        &self,
        time: Vec<crate::model::TimeValue>,
        values: ColumnValues,
    ) -> Result<TimeSeries, ValidationError> {
        Ok(TimeSeries::from_parts(
            self.time_column().to_string(),
            self.value_columns().to_vec(),
            time,
            values,
        )?
        .with_metadata_of(self))
    }
}

fn present(seq: &[Option<f64>]) -> Vec<f64> {
    seq.iter().flatten().copied().collect()
}

fn mean(xs: &[f64]) -> Option<f64> {
    (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
}

fn std_dev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = mean(xs)?;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
fn quantile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn fill(seq: &[Option<f64>], method: FillMethod, limit: Option<usize>) -> Vec<Option<f64>> {
    let limit = limit.unwrap_or(usize::MAX);
    match method {
        FillMethod::Forward => carry(seq.iter(), limit),
        FillMethod::Backward => {
            let mut out = carry(seq.iter().rev(), limit);
            out.reverse();
            out
        }
        FillMethod::Mean => with_default(seq, mean(&present(seq))),
        FillMethod::Median => with_default(seq, quantile(&present(seq), 0.5)),
        FillMethod::Constant(c) => with_default(seq, Some(c)),
    }
}

fn carry<'a>(iter: impl Iterator<Item = &'a Option<f64>>, limit: usize) -> Vec<Option<f64>> {
    let mut last = None;
    let mut run = 0usize;
    iter.map(|v| match v {
        Some(x) => {
            last = Some(*x);
            run = 0;
            Some(*x)
        }
        None => {
            run += 1;
            if run <= limit { last } else { None }
        }
    })
    .collect()
}

fn with_default(seq: &[Option<f64>], default: Option<f64>) -> Vec<Option<f64>> {
    seq.iter().map(|v| v.or(default)).collect()
}

fn normalize(seq: &[Option<f64>], method: NormalizeMethod) -> Vec<Option<f64>> {
    let xs = present(seq);
    let map = |f: &dyn Fn(f64) -> f64| -> Vec<Option<f64>> {
        seq.iter().map(|v| v.map(f)).collect()
    };
    match method {
        NormalizeMethod::MinMax => {
            let (Some(min), Some(max)) = (
                xs.iter().copied().reduce(f64::min),
                xs.iter().copied().reduce(f64::max),
            ) else {
                return seq.to_vec();
            };
            if max > min {
                map(&|x| (x - min) / (max - min))
            } else {
                let c = if min == 0.0 { 0.0 } else { 0.5 };
                map(&|_| c)
            }
        }
        NormalizeMethod::ZScore => match (mean(&xs), std_dev(&xs)) {
            (Some(m), Some(s)) if s > 0.0 => map(&|x| (x - m) / s),
            _ => seq.to_vec(),
        },
        NormalizeMethod::Robust => {
            match (quantile(&xs, 0.5), quantile(&xs, 0.25), quantile(&xs, 0.75)) {
                (Some(med), Some(q1), Some(q3)) if q3 > q1 => map(&|x| (x - med) / (q3 - q1)),
                _ => seq.to_vec(),
            }
        }
        NormalizeMethod::Log => {
            let min = xs.iter().copied().reduce(f64::min).unwrap_or(1.0);
            let offset = if min <= 0.0 { min.abs() + 1.0 } else { 0.0 };
            map(&|x| (x + offset).ln())
        }
    }
}

fn bounds(seq: &[Option<f64>], method: OutlierMethod, k: f64) -> Option<(f64, f64)> {
    let xs = present(seq);
    match method {
        OutlierMethod::Iqr => {
            let q1 = quantile(&xs, 0.25)?;
            let q3 = quantile(&xs, 0.75)?;
            let iqr = q3 - q1;
            Some((q1 - k * iqr, q3 + k * iqr))
        }
        OutlierMethod::ZScore => {
            let m = mean(&xs)?;
            let s = std_dev(&xs).filter(|s| *s > 0.0)?;
            Some((m - k * s, m + k * s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawTable;

    fn series(values: &[&str]) -> TimeSeries {
        let rows: Vec<Vec<Option<String>>> = values
            .iter()
            .enumerate()
            .map(|(i, v)| vec![Some(i.to_string()), (!v.is_empty()).then(|| v.to_string())])
            .collect();
        let raw = RawTable::new(vec!["t".into(), "v".into()], rows);
        TimeSeries::from_table(&raw, "t", &["v".to_string()])
            .unwrap()
            .with_id("s1")
    }

    #[test]
    fn forward_fill_respects_limit() {
        let ts = series(&["1", "", "", "4", ""]);
        let out = ts.fill_missing(None, FillMethod::Forward, Some(1)).unwrap();
        assert_eq!(out.column("v").unwrap(), &[Some(1.0), Some(1.0), None, Some(4.0), Some(4.0)]);
        assert_eq!(out.id(), Some("s1"));
    }

    #[test]
    fn backward_mean_median_constant_fill() {
        let ts = series(&["", "2", "", "6"]);
        assert_eq!(
            ts.fill_missing(None, FillMethod::Backward, None).unwrap().column("v").unwrap(),
            &[Some(2.0), Some(2.0), Some(6.0), Some(6.0)]
        );
        assert_eq!(
            ts.fill_missing(None, FillMethod::Mean, None).unwrap().column("v").unwrap(),
            &[Some(4.0), Some(2.0), Some(4.0), Some(6.0)]
        );
        assert_eq!(
            ts.fill_missing(None, FillMethod::Median, None).unwrap().column("v").unwrap(),
            &[Some(4.0), Some(2.0), Some(4.0), Some(6.0)]
        );
        assert_eq!(
            ts.fill_missing(None, FillMethod::Constant(0.0), None).unwrap().column("v").unwrap(),
            &[Some(0.0), Some(2.0), Some(0.0), Some(6.0)]
        );
    }

    #[test]
    fn non_finite_fill_is_rejected() {
        let ts = series(&["1", ""]);
        for c in [f64::INFINITY, f64::NAN] {
            assert!(matches!(
                ts.fill_missing(None, FillMethod::Constant(c), None),
                Err(ValidationError::NonFiniteValue { row: 1, .. })
            ));
        }
    }

    #[test]
    fn minmax_and_constant_columns() {
        let ts = series(&["2", "", "4", "6"]);
        let out = ts.normalize(None, NormalizeMethod::MinMax).unwrap();
        assert_eq!(out.column("v").unwrap(), &[Some(0.0), None, Some(0.5), Some(1.0)]);

        let flat = series(&["3", "3"]);
        let out = flat.normalize(None, NormalizeMethod::MinMax).unwrap();
        assert_eq!(out.column("v").unwrap(), &[Some(0.5), Some(0.5)]);
    }

    #[test]
    fn log_shifts_non_positive_values() {
        let ts = series(&["-1", "0", "1"]);
        let out = ts.normalize(None, NormalizeMethod::Log).unwrap();
        let got = out.column("v").unwrap();
        assert!((got[0].unwrap() - 1f64.ln()).abs() < 1e-12);
        assert!((got[2].unwrap() - 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn iqr_drops_outlier_rows_and_keeps_nulls() {
        let ts = series(&["1", "2", "", "3", "2", "100"]);
        let out = ts.remove_outliers(None, OutlierMethod::Iqr, 1.5).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.column("v").unwrap().last(), Some(&Some(2.0)));
        assert!(out.column("v").unwrap().contains(&None));
    }

    #[test]
    fn unknown_column_is_a_validation_error() {
        let ts = series(&["1"]);
        let err = ts
            .normalize(Some(&["nope".to_string()]), NormalizeMethod::ZScore)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownValueColumn { column: "nope".into() });
    }
}

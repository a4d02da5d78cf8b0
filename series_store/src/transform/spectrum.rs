//! Sample spacing and magnitude spectra.
//!
//! The bin frequencies depend on the spacing `dt` between samples, which is
//! inferred from the time axis as `(t_last - t_first) / (n - 1)`. When that
//! cannot be done (fewer than two samples, text labels on the axis, a span
//! that is zero or collapses below [`MIN_SAMPLE_SPACING`]) the fixed
//! [`FALLBACK_SAMPLE_SPACING`] is used instead. That is an approximation: the
//! frequency axis is then in "cycles per sample", not per real time unit.
//!
//! Unevenly spaced axes still use the mean spacing. They are reported as
//! [`SpacingSource::Irregular`] (deviation above [`UNIFORM_TOLERANCE`]) so
//! callers can flag the result; the spectrum itself is computed the same way.

use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::TimeValue;

/// Spacing substituted when none can be derived.
pub const FALLBACK_SAMPLE_SPACING: f64 = 1.0;

/// Derived spacings at or below this magnitude count as degenerate.
pub const MIN_SAMPLE_SPACING: f64 = 1e-9;

/// Largest relative deviation of a single step from the mean spacing for the
/// axis to count as uniform.
pub const UNIFORM_TOLERANCE: f64 = 1e-3;

/// Why the fallback spacing was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer than two time values.
    TooFewSamples,
    /// At least one time value is a text label.
    NonNumericTime,
    /// First and last time values coincide, or the spacing is ~0.
    DegenerateSpan,
}

/// How [`SampleSpacing::dt`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacingSource {
    /// Derived; every step is within tolerance of the mean.
    Uniform,
    /// Derived as the mean step of an unevenly spaced axis.
    Irregular,
    /// Not derivable; [`FALLBACK_SAMPLE_SPACING`] was substituted.
    Fallback(FallbackReason),
}

/// Spacing between consecutive samples, in seconds for timestamp axes and in
/// axis units for numeric axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSpacing {
    /// Spacing used for the bin frequencies. Always positive and finite.
    pub dt: f64,
    /// Provenance of `dt`.
    pub source: SpacingSource,
}

impl SampleSpacing {
    fn fallback(reason: FallbackReason) -> Self {
        Self {
            dt: FALLBACK_SAMPLE_SPACING,
            source: SpacingSource::Fallback(reason),
        }
    }

    /// Derives the spacing of `time`.
    pub fn derive(time: &[TimeValue]) -> Self {
        if time.len() < 2 {
            debug!(samples = time.len(), "too few samples, using fallback spacing");
            return Self::fallback(FallbackReason::TooFewSamples);
        }

        let Some(axis) = time
            .iter()
            .map(TimeValue::as_seconds)
            .collect::<Option<Vec<f64>>>()
        else {
            warn!("time axis has text labels, using fallback spacing");
            return Self::fallback(FallbackReason::NonNumericTime);
        };

        let n = axis.len();
        let dt = ((axis[n - 1] - axis[0]) / (n - 1) as f64).abs();
        if !dt.is_finite() || dt <= MIN_SAMPLE_SPACING {
            warn!(dt, "degenerate time span, using fallback spacing");
            return Self::fallback(FallbackReason::DegenerateSpan);
        }

        let uniform = axis
            .windows(2)
            .all(|w| ((w[1] - w[0]).abs() - dt).abs() <= UNIFORM_TOLERANCE * dt);
        let source = if uniform {
            SpacingSource::Uniform
        } else {
            debug!(dt, "irregular sampling, spectrum uses mean spacing");
            SpacingSource::Irregular
        };

        Self { dt, source }
    }
}

/// Magnitude of the non-negative-frequency half of the DFT of `samples`.
///
/// Returns `(frequencies, amplitudes)`, both of length `⌊n/2⌋+1` (empty when
/// `n == 0`). Bin `k` sits at `k / (n * dt)`.
pub fn magnitude_spectrum(samples: &[f64], dt: f64) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }

    let mut buf: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buf);

    let bins = n / 2 + 1;
    let scale = 1.0 / (n as f64 * dt);
    let frequencies = (0..bins).map(|k| k as f64 * scale).collect();
    let amplitudes = buf[..bins].iter().map(|c| c.norm()).collect();
    (frequencies, amplitudes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    #[test]
    fn sine_peaks_at_its_frequency() {
        // 64 samples at dt = 0.125s of a 2 Hz sine: peak in bin 2*64*0.125 = 16.
        let dt = 0.125;
        let samples: Vec<f64> = (0..64)
            .map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 * dt).sin())
            .collect();
        let (f, a) = magnitude_spectrum(&samples, dt);
        assert_eq!(f.len(), 33);
        let peak = a
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(y.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 16);
        assert!((f[peak] - 2.0).abs() < 1e-12);
        assert!((a[peak] - 32.0).abs() < 1e-9);
    }

    #[test]
    fn constant_signal_is_all_dc() {
        let (f, a) = magnitude_spectrum(&[3.0; 5], 1.0);
        assert_eq!(f, vec![0.0, 0.2, 0.4]);
        assert!((a[0] - 15.0).abs() < 1e-9);
        assert!(a[1..].iter().all(|x| x.abs() < 1e-9));
    }

    #[test]
    fn daily_timestamps_give_one_day_spacing() {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let axis: Vec<TimeValue> = (0..4)
            .map(|d| TimeValue::Timestamp(start + Duration::days(d)))
            .collect();
        let s = SampleSpacing::derive(&axis);
        assert_eq!(s.dt, 86_400.0);
        assert_eq!(s.source, SpacingSource::Uniform);
    }

    #[test]
    fn spacing_fallbacks_and_irregular_axes() {
        let same = vec![TimeValue::Number(5.0), TimeValue::Number(5.0)];
        assert_eq!(
            SampleSpacing::derive(&same).source,
            SpacingSource::Fallback(FallbackReason::DegenerateSpan)
        );

        let labels = vec![TimeValue::Text("a".into()), TimeValue::Text("b".into())];
        assert_eq!(
            SampleSpacing::derive(&labels),
            SampleSpacing {
                dt: FALLBACK_SAMPLE_SPACING,
                source: SpacingSource::Fallback(FallbackReason::NonNumericTime)
            }
        );

        let uneven: Vec<TimeValue> = [0.0, 1.0, 5.0, 6.0].into_iter().map(TimeValue::Number).collect();
        let s = SampleSpacing::derive(&uneven);
        assert_eq!(s.dt, 2.0);
        assert_eq!(s.source, SpacingSource::Irregular);
    }

    proptest! {
        #[test]
        fn spectrum_has_half_plus_one_bins(
            samples in proptest::collection::vec(-1e3f64..1e3, 0..200),
            dt in 0.001f64..100.0,
        ) {
            let (f, a) = magnitude_spectrum(&samples, dt);
            prop_assert_eq!(f.len(), a.len());
            let want = if samples.is_empty() { 0 } else { samples.len() / 2 + 1 };
            prop_assert_eq!(f.len(), want);
            prop_assert!(a.iter().all(|x| x.is_finite() && *x >= 0.0));
        }
    }
}

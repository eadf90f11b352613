use chrono::TimeDelta;

use crate::config::GapMode;
use crate::data::model::{Series, SeriesIndex, Timestamp, seconds_between};
use crate::duration::{as_seconds_f64, has_alpha, parse_duration};
use crate::error::AnalysisError;

// ---------------------------------------------------------------------------
// Window / time-constant specifications
// ---------------------------------------------------------------------------

/// Moving-average window: a sample count or a trailing time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    Samples(usize),
    Duration(TimeDelta),
}

impl WindowSpec {
    /// Parse `"10"` (samples) or `"30min"` (duration).
    ///
    /// Returns `Ok(None)` for an empty string or a non-positive sample count,
    /// meaning "no smoothing".
    pub fn parse(text: &str) -> Result<Option<WindowSpec>, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if !has_alpha(text) {
            let value: f64 = text
                .parse()
                .map_err(|_| AnalysisError::InvalidWindow(text.to_string()))?;
            let samples = value.trunc();
            if samples < 1.0 {
                return Ok(None);
            }
            return Ok(Some(WindowSpec::Samples(samples as usize)));
        }
        let span = parse_duration(text).map_err(|_| AnalysisError::InvalidWindow(text.to_string()))?;
        Ok(Some(WindowSpec::Duration(span)))
    }
}

/// Parse an EMA time constant: seconds (`"60"`) or a duration (`"15min"`).
/// Returns seconds; `Ok(None)` for an empty string.
pub fn parse_time_constant(text: &str) -> Result<Option<f64>, AnalysisError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if !has_alpha(text) {
        return text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| AnalysisError::InvalidTimeConstant(text.to_string()));
    }
    parse_duration(text)
        .map(|d| Some(as_seconds_f64(d)))
        .map_err(|_| AnalysisError::InvalidTimeConstant(text.to_string()))
}

// ---------------------------------------------------------------------------
// Simple moving average
// ---------------------------------------------------------------------------

/// Trailing simple moving average with `min_periods = 1`.
///
/// A sample-count window covers the last `n` rows (missing rows take up a
/// slot but do not contribute). A duration window covers the samples in
/// `(t - span, t]` and needs a time-indexed series.
pub fn moving_average(series: &Series, window: WindowSpec) -> Result<Series, AnalysisError> {
    let values = match window {
        WindowSpec::Samples(n) => rolling_mean_samples(&series.values, n),
        WindowSpec::Duration(span) => {
            let times = series.times("time-based moving average")?;
            rolling_mean_time(times, &series.values, span)
        }
    };
    Ok(series.with_values(values))
}

fn rolling_mean_samples(values: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    let n = n.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..values.len() {
        if let Some(v) = values[i] {
            sum += v;
            count += 1;
        }
        if i >= n {
            if let Some(old) = values[i - n] {
                sum -= old;
                count -= 1;
            }
        }
        out.push((count > 0).then(|| sum / count as f64));
    }
    out
}

/// Mean of the non-missing samples in the trailing window `(t - span, t]`.
pub(crate) fn rolling_mean_time(
    times: &[Timestamp],
    values: &[Option<f64>],
    span: TimeDelta,
) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut start = 0;
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..values.len() {
        if let Some(v) = values[i] {
            sum += v;
            count += 1;
        }
        while start < i && times[start] <= times[i] - span {
            if let Some(old) = values[start] {
                sum -= old;
                count -= 1;
            }
            start += 1;
        }
        out.push((count > 0).then(|| sum / count as f64));
    }
    out
}

// ---------------------------------------------------------------------------
// Time-aware exponential smoothing
// ---------------------------------------------------------------------------

/// Exponential moving average whose weight depends on the elapsed time since
/// the previous valid sample: `alpha = 1 - exp(-dt / tau)`.
///
/// `tau_seconds <= 0` disables the filter. A positional series is treated as
/// sampled once per second. Negative `dt` is clamped to zero.
pub fn exponential_smoothing(series: &Series, tau_seconds: f64, mode: GapMode) -> Series {
    if !(tau_seconds > 0.0) {
        return series.clone();
    }

    let elapsed = |a: usize, b: usize| -> f64 {
        match &series.index {
            SeriesIndex::Time(times) => seconds_between(times[a], times[b]),
            SeriesIndex::Position => b as f64 - a as f64,
        }
    };

    let mut out = Vec::with_capacity(series.len());
    let mut state: Option<f64> = None;
    let mut prev_idx: Option<usize> = None;

    for (i, value) in series.values.iter().enumerate() {
        let Some(value) = *value else {
            match mode {
                GapMode::Skip => out.push(None),
                GapMode::Reset => {
                    state = None;
                    out.push(None);
                }
                GapMode::Hold => out.push(state),
            }
            continue;
        };

        let next = match (state, prev_idx) {
            (Some(prev), Some(p)) => {
                let dt = elapsed(p, i).max(0.0);
                let alpha = 1.0 - (-dt / tau_seconds).exp();
                alpha * value + (1.0 - alpha) * prev
            }
            _ => value,
        };
        state = Some(next);
        prev_idx = Some(i);
        out.push(Some(next));
    }

    series.with_values(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(points: &[(i64, Option<f64>)]) -> Series {
        Series::with_times(
            "x",
            points.iter().map(|(s, _)| Utc.timestamp_opt(*s, 0).unwrap()).collect(),
            points.iter().map(|(_, v)| *v).collect(),
        )
    }

    #[test]
    fn window_parsing() {
        assert_eq!(WindowSpec::parse("3").unwrap(), Some(WindowSpec::Samples(3)));
        assert_eq!(WindowSpec::parse("0").unwrap(), None);
        assert_eq!(WindowSpec::parse("").unwrap(), None);
        assert_eq!(
            WindowSpec::parse("30min").unwrap(),
            Some(WindowSpec::Duration(TimeDelta::minutes(30)))
        );
        assert!(matches!(WindowSpec::parse("30 parsecs"), Err(AnalysisError::InvalidWindow(_))));
        assert_eq!(parse_time_constant("60").unwrap(), Some(60.0));
        assert_eq!(parse_time_constant("15min").unwrap(), Some(900.0));
        assert!(matches!(parse_time_constant("fast"), Err(AnalysisError::InvalidTimeConstant(_))));
    }

    #[test]
    fn sample_window_has_no_leading_gaps() {
        let s = series(&[(0, Some(0.0)), (60, Some(0.0)), (120, Some(10.0)), (180, Some(10.0)), (240, Some(10.0))]);
        let out = moving_average(&s, WindowSpec::Samples(3)).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.values[0], Some(0.0));
        assert!(out.values[2].unwrap() > 0.0);
        assert!((out.values[3].unwrap() - 20.0 / 3.0).abs() < 1e-12);
        assert_eq!(out.values[4], Some(10.0));
    }

    #[test]
    fn time_window_follows_elapsed_time() {
        // Irregular cadence: the 2-minute window holds 2 samples, then 1.
        let s = series(&[(0, Some(1.0)), (60, Some(3.0)), (400, Some(5.0))]);
        let out = moving_average(&s, WindowSpec::Duration(TimeDelta::minutes(2))).unwrap();
        assert_eq!(out.values, vec![Some(1.0), Some(2.0), Some(5.0)]);

        let positional = Series::positional("x", vec![Some(1.0)]);
        assert!(matches!(
            moving_average(&positional, WindowSpec::Duration(TimeDelta::minutes(1))),
            Err(AnalysisError::NotTimeIndexed(_))
        ));
    }

    #[test]
    fn ema_uses_elapsed_time() {
        let s = series(&[(0, Some(0.0)), (60, Some(10.0)), (120, Some(10.0))]);
        let out = exponential_smoothing(&s, 60.0, GapMode::Skip);
        let alpha = 1.0 - (-1.0_f64).exp();
        assert_eq!(out.values[0], Some(0.0));
        assert!((out.values[1].unwrap() - 10.0 * alpha).abs() < 1e-12);
        assert!(out.values[2].unwrap() > out.values[1].unwrap());

        // A longer gap gives the new sample more weight.
        let slow = series(&[(0, Some(0.0)), (600, Some(10.0))]);
        let out_slow = exponential_smoothing(&slow, 60.0, GapMode::Skip);
        assert!(out_slow.values[1].unwrap() > out.values[1].unwrap());
    }

    #[test]
    fn ema_gap_modes() {
        let s = series(&[(0, Some(10.0)), (60, None), (120, Some(0.0))]);

        let skip = exponential_smoothing(&s, 60.0, GapMode::Skip);
        assert_eq!(skip.values[1], None);
        // state survived the gap, dt measured from the last valid sample
        let alpha = 1.0 - (-2.0_f64).exp();
        assert!((skip.values[2].unwrap() - (1.0 - alpha) * 10.0).abs() < 1e-12);

        let hold = exponential_smoothing(&s, 60.0, GapMode::Hold);
        assert_eq!(hold.values[1], Some(10.0));

        let reset = exponential_smoothing(&s, 60.0, GapMode::Reset);
        assert_eq!(reset.values[1], None);
        assert_eq!(reset.values[2], Some(0.0));
    }

    #[test]
    fn non_positive_tau_is_passthrough() {
        let s = series(&[(0, Some(1.0)), (60, Some(5.0))]);
        assert_eq!(exponential_smoothing(&s, 0.0, GapMode::Skip), s);
        assert_eq!(exponential_smoothing(&s, -5.0, GapMode::Hold), s);
    }
}

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::fit::{fit_co2_decay, reaches_target};
use super::{Co2FitMethod, DecayEvent};
use crate::data::model::{Series, Timestamp, seconds_between};
use crate::error::AnalysisError;

/// Tunable thresholds for [`detect_co2_decay_events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum peak-to-trough drop in excess (ppm); also the minimum peak height.
    pub min_drop: f64,
    /// Minimum event duration.
    pub min_minutes: f64,
    pub min_points: usize,
    /// A peak closer than this to the previous event's end is ignored.
    pub min_gap_minutes: f64,
    pub method: Co2FitMethod,
}

impl DetectionConfig {
    /// Thresholds must be non-negative; `+inf` means "never".
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for (what, value) in [
            ("minimum drop", self.min_drop),
            ("minimum event duration", self.min_minutes),
            ("minimum gap between events", self.min_gap_minutes),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(AnalysisError::InvalidThreshold { what, value });
            }
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_drop: 100.0,
            min_minutes: 10.0,
            min_points: 4,
            min_gap_minutes: 5.0,
            method: Co2FitMethod::TimeConstant63,
        }
    }
}

/// Local extrema of a smoothed signal, as indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extrema {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

/// Centered rolling median over three samples; the two end points take the
/// median (mean) of their two-sample window.
pub fn smooth_excess(excess: &[f64]) -> Vec<f64> {
    let n = excess.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            let mut window: Vec<f64> = excess[lo..=hi].to_vec();
            window.sort_by(f64::total_cmp);
            match window.len() {
                3 => window[1],
                2 => (window[0] + window[1]) / 2.0,
                _ => window[0],
            }
        })
        .collect()
}

/// Peaks: `>=` the previous and `>` the next smoothed value, and at least
/// `min_height`. The first sample is a peak when it is `>=` its neighbour.
/// The last sample is never a peak.
///
/// Troughs: `<=` the previous and `<` the next smoothed value.
pub fn find_extrema(smooth: &[f64], min_height: f64) -> Extrema {
    let n = smooth.len();
    let mut extrema = Extrema::default();
    if n < 2 {
        return extrema;
    }
    if smooth[0] >= smooth[1] && smooth[0] >= min_height {
        extrema.peaks.push(0);
    }
    for i in 1..n - 1 {
        let (prev, cur, next) = (smooth[i - 1], smooth[i], smooth[i + 1]);
        if cur >= prev && cur > next && cur >= min_height {
            extrema.peaks.push(i);
        }
        if cur <= prev && cur < next {
            extrema.troughs.push(i);
        }
    }
    extrema
}

/// `None` when the span does not fit in a `TimeDelta`.
fn minutes(m: f64) -> Option<TimeDelta> {
    if !m.is_finite() {
        return None;
    }
    TimeDelta::try_milliseconds((m * 60_000.0).round() as i64)
}

/// Segment a CO2 log into decay events and fit each one.
///
/// Heuristic: every qualifying peak is paired with the next trough (or the
/// lowest later sample). The event ends at the first 1/e crossing, or at the
/// trough when the excess never gets that low; in that case a requested
/// `time_constant_63` fit falls back to `regression`.
pub fn detect_co2_decay_events(
    series: &Series,
    baseline: f64,
    cfg: &DetectionConfig,
) -> Result<Vec<DecayEvent>, AnalysisError> {
    cfg.validate()?;
    let points = series.valid_points("CO2 decay event detection")?;
    let excess: Vec<f64> = points.iter().map(|(_, v)| v - baseline).collect();
    let n = points.len();
    if n < 3 || !excess.iter().any(|e| *e > 0.0) {
        return Ok(Vec::new());
    }

    let smooth = smooth_excess(&excess);
    let extrema = find_extrema(&smooth, cfg.min_drop);
    let min_gap = minutes(cfg.min_gap_minutes);
    let min_duration = minutes(cfg.min_minutes);

    let mut events: Vec<DecayEvent> = Vec::new();
    let mut last_end: Option<Timestamp> = None;

    for &peak in &extrema.peaks {
        let peak_time = points[peak].0;
        // an unrepresentable gap blocks every later peak
        let too_close = last_end.is_some_and(|end| {
            min_gap
                .and_then(|gap| end.checked_add_signed(gap))
                .map_or(true, |limit| peak_time < limit)
        });
        if too_close {
            continue;
        }

        let trough = match extrema.troughs.iter().copied().find(|&t| t > peak) {
            Some(t) => t,
            None if peak + 1 < n => lowest_after(&excess, peak),
            None => continue,
        };

        if excess[peak] - excess[trough] < cfg.min_drop {
            continue;
        }
        let span_hours = seconds_between(peak_time, points[trough].0) / 3600.0;
        if span_hours <= 0.0 || (excess[trough] - excess[peak]) / span_hours >= 0.0 {
            continue;
        }

        let peak_excess = excess[peak];
        let target = peak_excess / std::f64::consts::E;
        let crossing = (peak + 1..=trough).find(|&j| reaches_target(excess[j], target, peak_excess));
        let end = crossing.unwrap_or(trough);
        let end_time = points[end].0;
        let too_short = min_duration.map_or(true, |d| end_time - peak_time < d);
        if too_short || end - peak + 1 < cfg.min_points {
            continue;
        }

        let mut method = cfg.method;
        let mut warnings = Vec::new();
        if crossing.is_none() && method == Co2FitMethod::TimeConstant63 {
            method = Co2FitMethod::Regression;
            warnings.push("Did not reach 1/e before next rise; used regression".to_string());
        }

        let segment = Series::from_points(&series.name, &points[peak..=end]);
        let fit = fit_co2_decay(&segment, baseline, method)?;
        warnings.extend(fit.warnings);

        events.push(DecayEvent {
            label: format!("E{}", events.len() + 1),
            start: peak_time,
            end: end_time,
            peak_time,
            peak_value: points[peak].1,
            baseline,
            method,
            ach: fit.ach,
            r2: fit.r2,
            warnings,
        });
        last_end = Some(end_time);
    }

    log::debug!(
        "decay detection: {} peaks, {} troughs, {} events",
        extrema.peaks.len(),
        extrema.troughs.len(),
        events.len()
    );
    Ok(events)
}

/// Index of the first minimum after `peak`.
fn lowest_after(excess: &[f64], peak: usize) -> usize {
    let mut best = peak + 1;
    for i in peak + 2..excess.len() {
        if excess[i] < excess[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn five_minutely(values: &[f64]) -> Series {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + TimeDelta::minutes(5 * i as i64), *v))
            .collect();
        Series::from_points("co2", &points)
    }

    #[test]
    fn median_smoothing_removes_single_spikes() {
        assert_eq!(smooth_excess(&[0.0, 10.0, 0.0, 0.0]), vec![5.0, 0.0, 0.0, 0.0]);
        assert_eq!(smooth_excess(&[3.0]), vec![3.0]);
    }

    #[test]
    fn first_sample_can_peak_last_cannot() {
        let e = find_extrema(&[500.0, 400.0, 300.0, 350.0, 600.0], 100.0);
        assert_eq!(e.peaks, vec![0]);
        assert_eq!(e.troughs, vec![2]);

        // below the minimum height
        assert!(find_extrema(&[50.0, 40.0, 30.0], 100.0).peaks.is_empty());
    }

    #[test]
    fn plateau_peak_sits_on_its_last_sample() {
        let e = find_extrema(&[0.0, 700.0, 700.0, 600.0], 100.0);
        assert_eq!(e.peaks, vec![2]);
    }

    #[test]
    fn two_separated_decays_give_two_events() {
        let baseline = 400.0;
        let values: Vec<f64> = (0..61)
            .map(|i| {
                let t = i as f64 * 5.0 / 60.0;
                if t <= 1.0 {
                    baseline + 1000.0 * (-t).exp()
                } else if (2.0..=3.0).contains(&t) {
                    baseline + 800.0 * (-(t - 2.0)).exp()
                } else {
                    baseline
                }
            })
            .collect();
        let cfg = DetectionConfig {
            min_drop: 300.0,
            ..Default::default()
        };
        let events = detect_co2_decay_events(&five_minutely(&values), baseline, &cfg).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].label, "E1");
        assert_eq!(events[1].label, "E2");
        assert!(events[0].end < events[1].start);
        assert_eq!(events[0].peak_value, 1400.0);
        assert!((events[0].ach - 1.0).abs() < 0.1);
        assert!(events.iter().all(|e| e.method == Co2FitMethod::TimeConstant63));
    }

    #[test]
    fn missing_crossing_falls_back_to_regression() {
        let mut values: Vec<f64> = (0..=12)
            .map(|i| 400.0 + 1000.0 * (-0.7 * i as f64 * 5.0 / 60.0).exp())
            .collect();
        values.extend([1100.0, 1300.0, 1350.0, 1350.0]);
        let events = detect_co2_decay_events(&five_minutely(&values), 400.0, &DetectionConfig::default()).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.method, Co2FitMethod::Regression);
        assert!(event.warnings[0].contains("used regression"));
        assert!((event.ach - 0.7).abs() < 1e-6);
        assert!(event.r2 > 0.99);
    }

    fn two_decays() -> Series {
        let values: Vec<f64> = (0..61)
            .map(|i| {
                let t = i as f64 * 5.0 / 60.0;
                if t <= 1.0 {
                    400.0 + 1000.0 * (-t).exp()
                } else if (2.0..=3.0).contains(&t) {
                    400.0 + 800.0 * (-(t - 2.0)).exp()
                } else {
                    400.0
                }
            })
            .collect();
        five_minutely(&values)
    }

    #[test]
    fn unbounded_gap_keeps_only_the_first_event() {
        for gap in [f64::INFINITY, 1e300, 1e15] {
            let cfg = DetectionConfig {
                min_drop: 300.0,
                min_gap_minutes: gap,
                ..Default::default()
            };
            let events = detect_co2_decay_events(&two_decays(), 400.0, &cfg).unwrap();
            assert_eq!(events.len(), 1, "gap {gap}");
            assert_eq!(events[0].label, "E1");
        }
    }

    #[test]
    fn unbounded_duration_rejects_every_event() {
        let cfg = DetectionConfig {
            min_drop: 300.0,
            min_minutes: f64::INFINITY,
            ..Default::default()
        };
        assert!(detect_co2_decay_events(&two_decays(), 400.0, &cfg).unwrap().is_empty());
    }

    #[test]
    fn negative_or_nan_thresholds_are_rejected() {
        let bad = [
            DetectionConfig {
                min_gap_minutes: f64::NEG_INFINITY,
                ..Default::default()
            },
            DetectionConfig {
                min_minutes: -1.0,
                ..Default::default()
            },
            DetectionConfig {
                min_drop: f64::NAN,
                ..Default::default()
            },
        ];
        for cfg in &bad {
            assert!(matches!(
                detect_co2_decay_events(&two_decays(), 400.0, cfg),
                Err(AnalysisError::InvalidThreshold { .. })
            ));
        }
        assert!(DetectionConfig::default().validate().is_ok());
    }

    #[test]
    fn nothing_to_detect() {
        let cfg = DetectionConfig::default();
        let flat = five_minutely(&[400.0, 390.0, 380.0, 400.0]);
        assert!(detect_co2_decay_events(&flat, 400.0, &cfg).unwrap().is_empty());
        let short = five_minutely(&[900.0, 500.0]);
        assert!(detect_co2_decay_events(&short, 400.0, &cfg).unwrap().is_empty());
        let positional = Series::positional("co2", vec![Some(900.0); 5]);
        assert!(detect_co2_decay_events(&positional, 400.0, &cfg).is_err());
    }
}

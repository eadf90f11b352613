use serde::Serialize;

use super::DecayEvent;
use crate::data::gaps::median;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchSummary {
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (N - 1); 0 for a single event.
    pub std: f64,
}

/// Statistics over events with `r2 >= min_r2` and a finite ACH.
/// `None` when no event qualifies.
pub fn summarize_ach(events: &[DecayEvent], min_r2: f64) -> Option<AchSummary> {
    let values: Vec<f64> = events
        .iter()
        .filter(|e| e.r2 >= min_r2 && e.ach.is_finite())
        .map(|e| e.ach)
        .collect();
    let n = values.len();
    let median = median(&values)?;

    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(AchSummary {
        n,
        mean,
        median,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ventilation::Co2FitMethod;
    use chrono::{TimeZone, Utc};

    fn event(label: &str, ach: f64, r2: f64) -> DecayEvent {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DecayEvent {
            label: label.into(),
            start: t0,
            end: t0,
            peak_time: t0,
            peak_value: 1000.0,
            baseline: 400.0,
            method: Co2FitMethod::Regression,
            ach,
            r2,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn low_quality_events_are_excluded() {
        let events = [event("E1", 0.5, 0.95), event("E2", 1.0, 0.85), event("E3", 1.5, 0.99)];
        let s = summarize_ach(&events, 0.9).unwrap();
        assert_eq!(s.n, 2);
        assert!((s.mean - 1.0).abs() < 1e-12);
        assert!((s.median - 1.0).abs() < 1e-12);
        assert_eq!(s.min, 0.5);
        assert_eq!(s.max, 1.5);
        assert!((s.std - 0.70710678).abs() < 1e-6);
    }

    #[test]
    fn empty_when_nothing_qualifies() {
        assert!(summarize_ach(&[event("E1", 2.0, 0.5)], 0.9).is_none());
        assert!(summarize_ach(&[event("E1", f64::NAN, 0.99)], 0.9).is_none());
        let single = summarize_ach(&[event("E1", 2.0, 0.95)], 0.9).unwrap();
        assert_eq!(single.std, 0.0);
    }
}

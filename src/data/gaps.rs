use super::model::{Gap, Timestamp, seconds_between};

/// Flag every interval longer than `factor ×` the median sampling interval.
///
/// Returns gaps in chronological order. When no positive cadence can be
/// established (fewer than two samples, or a non-positive median), no gaps
/// are reported.
pub fn detect_gaps(times: &[Timestamp], factor: f64) -> Vec<Gap> {
    if times.len() < 2 {
        return Vec::new();
    }

    let deltas: Vec<f64> = times
        .windows(2)
        .map(|w| seconds_between(w[0], w[1]))
        .collect();

    let Some(median) = median(&deltas) else {
        return Vec::new();
    };
    if median.is_nan() || median <= 0.0 {
        return Vec::new();
    }

    let threshold = median * factor;
    deltas
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > threshold)
        .map(|(i, _)| Gap {
            start: times[i],
            end: times[i + 1],
        })
        .collect()
}

/// Median of a slice (mean of the two middle values for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

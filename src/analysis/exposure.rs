use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::data::model::{Series, Timestamp, elapsed_deltas};
use crate::error::AnalysisError;

/// Time-weighted exposure of one series against a threshold.
///
/// Every sample covers the interval since the previous sample; the first
/// sample has zero width. A missing sample adds its interval to
/// `total_seconds` but contributes no area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExposureStats {
    /// Σ value·Δt, in unit·seconds.
    pub auc: f64,
    /// Σ max(value − threshold, 0)·Δt.
    pub exceedance_auc: f64,
    pub time_above_seconds: f64,
    pub total_seconds: f64,
    pub mean: Option<f64>,
    pub mean_excess: Option<f64>,
    pub time_above_pct: Option<f64>,
    /// `mean / threshold`; undefined for a zero threshold.
    pub relative_to_threshold: Option<f64>,
}

pub fn exposure_stats(series: &Series, threshold: f64) -> Result<ExposureStats, AnalysisError> {
    let times = series.times("exposure")?;
    Ok(stats_over(times, &series.values, threshold))
}

fn stats_over(times: &[Timestamp], values: &[Option<f64>], threshold: f64) -> ExposureStats {
    let deltas = elapsed_deltas(times);
    let mut auc = 0.0;
    let mut exceedance_auc = 0.0;
    let mut time_above_seconds = 0.0;
    let mut total_seconds = 0.0;

    for (value, dt) in values.iter().zip(&deltas) {
        total_seconds += dt;
        let Some(v) = value else { continue };
        auc += v * dt;
        exceedance_auc += (v - threshold).max(0.0) * dt;
        if *v > threshold {
            time_above_seconds += dt;
        }
    }

    let per_second = |x: f64| (total_seconds > 0.0).then(|| x / total_seconds);
    let mean = per_second(auc);
    ExposureStats {
        auc,
        exceedance_auc,
        time_above_seconds,
        total_seconds,
        mean,
        mean_excess: per_second(exceedance_auc),
        time_above_pct: per_second(time_above_seconds).map(|f| f * 100.0),
        relative_to_threshold: mean.filter(|_| threshold > 0.0).map(|m| m / threshold),
    }
}

// ---------------------------------------------------------------------------
// Calendar periods
// ---------------------------------------------------------------------------

/// Calendar bucket for periodic exposure summaries (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Daily,
    /// ISO weeks, starting Monday 00:00.
    Weekly,
    Monthly,
}

impl Period {
    fn bucket_start(self, t: &Timestamp) -> NaiveDate {
        let day = t.date_naive();
        match self {
            Period::Daily => day,
            Period::Weekly => day - TimeDelta::days(day.weekday().num_days_from_monday() as i64),
            Period::Monthly => day.with_day(1).unwrap_or(day),
        }
    }
}

impl FromStr for Period {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily" | "D" => Ok(Period::Daily),
            "weekly" | "W" => Ok(Period::Weekly),
            "monthly" | "M" | "MS" => Ok(Period::Monthly),
            other => Err(AnalysisError::InvalidPeriod(other.to_string())),
        }
    }
}

/// Exposure statistics for one calendar bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodSummary {
    /// Start of the calendar bucket.
    pub start: Timestamp,
    /// Last sample inside the bucket.
    pub end: Timestamp,
    #[serde(flatten)]
    pub stats: ExposureStats,
}

/// One [`PeriodSummary`] per non-empty bucket, in time order. Widths are
/// measured within each bucket, so its first sample has zero width.
pub fn summarize_periods(series: &Series, threshold: f64, period: Period) -> Result<Vec<PeriodSummary>, AnalysisError> {
    let mut points = series
        .times("periodic exposure")?
        .iter()
        .copied()
        .zip(series.values.iter().copied())
        .collect::<Vec<_>>();
    points.sort_by_key(|(t, _)| *t);

    let mut out = Vec::new();
    let mut i = 0;
    while i < points.len() {
        let bucket = period.bucket_start(&points[i].0);
        let mut j = i + 1;
        while j < points.len() && period.bucket_start(&points[j].0) == bucket {
            j += 1;
        }
        let (times, values): (Vec<Timestamp>, Vec<Option<f64>>) = points[i..j].iter().copied().unzip();
        out.push(PeriodSummary {
            start: bucket.and_time(NaiveTime::MIN).and_utc(),
            end: times[times.len() - 1],
            stats: stats_over(&times, &values, threshold),
        });
        i = j;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn hourly(start: Timestamp, values: &[Option<f64>]) -> Series {
        let times = (0..values.len()).map(|h| start + TimeDelta::hours(h as i64)).collect();
        Series::with_times("pm2_5", times, values.to_vec())
    }

    fn jan1() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn constant_series_integrates_to_value_times_duration() {
        let s = hourly(jan1(), &[Some(10.0); 4]);
        let stats = exposure_stats(&s, 5.0).unwrap();
        assert_eq!(stats.auc, 10.0 * 3.0 * 3600.0);
        assert_eq!(stats.total_seconds, 3.0 * 3600.0);
        assert_eq!(stats.mean, Some(10.0));
        assert_eq!(stats.relative_to_threshold, Some(2.0));
        assert_eq!(stats.time_above_pct, Some(100.0));
        assert_eq!(stats.exceedance_auc, 5.0 * 3.0 * 3600.0);
    }

    #[test]
    fn zero_threshold_and_zero_duration_are_undefined() {
        let s = hourly(jan1(), &[Some(10.0); 2]);
        assert_eq!(exposure_stats(&s, 0.0).unwrap().relative_to_threshold, None);

        let single = hourly(jan1(), &[Some(10.0)]);
        let stats = exposure_stats(&single, 5.0).unwrap();
        assert_eq!(stats.auc, 0.0);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.relative_to_threshold, None);
    }

    #[test]
    fn missing_samples_count_time_but_no_area() {
        let s = hourly(jan1(), &[Some(10.0), None, Some(10.0)]);
        let stats = exposure_stats(&s, 5.0).unwrap();
        assert_eq!(stats.auc, 36_000.0);
        assert_eq!(stats.total_seconds, 7200.0);
        assert_eq!(stats.time_above_seconds, 3600.0);
        assert_eq!(stats.time_above_pct, Some(50.0));
    }

    #[test]
    fn positional_series_is_rejected() {
        let s = Series::positional("x", vec![Some(1.0)]);
        assert!(matches!(exposure_stats(&s, 1.0), Err(AnalysisError::NotTimeIndexed(_))));
        assert!(summarize_periods(&s, 1.0, Period::Daily).is_err());
    }

    #[test]
    fn daily_summary() {
        let s = hourly(jan1(), &[Some(1.0); 4]);
        let rows = summarize_periods(&s, 0.5, Period::Daily).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stats.auc, 3.0 * 3600.0);
        assert_eq!(rows[0].stats.time_above_seconds, 3.0 * 3600.0);
        assert_eq!(rows[0].start, jan1());
        assert_eq!(rows[0].end, jan1() + TimeDelta::hours(3));
    }

    #[test]
    fn buckets_skip_empty_periods() {
        // 2024-01-01 is a Monday; 2024-01-10 is in the following ISO week.
        let later = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let times = vec![jan1(), jan1() + TimeDelta::hours(1), later];
        let s = Series::with_times("co2", times, vec![Some(1.0), Some(2.0), Some(3.0)]);

        let daily = summarize_periods(&s, 0.0, Period::Daily).unwrap();
        assert_eq!(daily.len(), 2);

        let weekly = summarize_periods(&s, 0.0, Period::Weekly).unwrap();
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[1].start, Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap());
        assert_eq!(weekly[1].stats.total_seconds, 0.0);

        let monthly = summarize_periods(&s, 0.0, Period::Monthly).unwrap();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].end, later);
        assert_eq!("W".parse::<Period>().unwrap(), Period::Weekly);
        assert!(matches!("fortnightly".parse::<Period>(), Err(AnalysisError::InvalidPeriod(_))));
    }
}

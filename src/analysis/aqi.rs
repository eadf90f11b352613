use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use super::smoothing::rolling_mean_time;
use super::standards::{Breakpoint, Category, Pollutant, Rounding, StandardPack};
use crate::data::model::{Series, SeriesIndex, Timestamp, elapsed_deltas};
use crate::error::AnalysisError;

// ---------------------------------------------------------------------------
// Sub-index arithmetic
// ---------------------------------------------------------------------------

/// Truncate a concentration to a reporting step (e.g. 0.1 µg/m³).
pub fn truncate_concentration(value: f64, step: f64) -> f64 {
    if !(step > 0.0) {
        return value;
    }
    let scale = 1.0 / step;
    (value * scale + 1e-9).floor() / scale
}

pub fn apply_rounding(value: f64, mode: Rounding) -> f64 {
    match mode {
        Rounding::Round => (value + 0.5).floor(),
        Rounding::Floor | Rounding::Truncate => value.trunc(),
        Rounding::Unrounded => value,
    }
}

/// Piecewise-linear sub-index of one concentration.
///
/// `segments` must be sorted by `conc_low`; the first segment containing the
/// value wins. Returns `None` for a value no segment covers.
pub fn sub_index(value: f64, segments: &[Breakpoint], rounding: Rounding, extrapolate_upper: bool) -> Option<f64> {
    let last = segments.len().checked_sub(1)?;
    let seg = segments.iter().enumerate().find_map(|(i, seg)| {
        let inside = if extrapolate_upper && i == last {
            value >= seg.conc_low
        } else {
            value >= seg.conc_low && value <= seg.conc_high
        };
        inside.then_some(seg)
    })?;
    let raw = (seg.index_high - seg.index_low) / (seg.conc_high - seg.conc_low) * (value - seg.conc_low)
        + seg.index_low;
    Some(apply_rounding(raw, rounding))
}

fn pollutant_sub_indices(values: &[Option<f64>], pollutant: Pollutant, pack: &StandardPack) -> Option<Vec<Option<f64>>> {
    let segments = pack.segments(pollutant)?;
    let step = pack.truncation_for(pollutant);
    let rounding = pack.rounding_for(pollutant);
    Some(
        values
            .iter()
            .map(|v| {
                let v = (*v)?;
                let v = step.map_or(v, |s| truncate_concentration(v, s));
                sub_index(v, segments, rounding, pack.extrapolate_upper)
            })
            .collect(),
    )
}

/// First category whose inclusive range holds `value`.
pub fn classify<'a>(value: f64, categories: &'a [Category]) -> Option<&'a Category> {
    categories.iter().find(|c| c.contains(value))
}

// ---------------------------------------------------------------------------
// AQI table
// ---------------------------------------------------------------------------

/// Per-sample AQI results on a shared index.
#[derive(Debug, Clone, PartialEq)]
pub struct AqiTable {
    pub index: SeriesIndex,
    /// Present when PM2.5 was supplied and the pack covers it.
    pub pm25: Option<Vec<Option<f64>>>,
    pub pm10: Option<Vec<Option<f64>>>,
    /// Worst sub-index per row.
    pub overall: Vec<Option<f64>>,
    /// Present when the pack defines categories.
    pub category: Option<Vec<Option<String>>>,
}

impl AqiTable {
    pub fn len(&self) -> usize {
        self.overall.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overall.is_empty()
    }

    pub fn overall_series(&self) -> Series {
        Series {
            name: "aqi_overall".to_string(),
            index: self.index.clone(),
            values: self.overall.clone(),
        }
    }
}

/// Compute PM2.5 / PM10 sub-indices and the overall index.
///
/// Two time-indexed inputs are aligned on the union of their timestamps; two
/// positional inputs on row position. Mixing the two kinds is an error.
pub fn compute_aqi(
    pm25: Option<&Series>,
    pm10: Option<&Series>,
    pack: &StandardPack,
) -> Result<AqiTable, AnalysisError> {
    let pm25 = pm25.filter(|_| pack.segments(Pollutant::Pm25).is_some());
    let pm10 = pm10.filter(|_| pack.segments(Pollutant::Pm10).is_some());

    let (index, pm25_values, pm10_values) = align(pm25, pm10)?;
    let rows = match &index {
        SeriesIndex::Time(times) => times.len(),
        SeriesIndex::Position => pm25_values
            .as_ref()
            .or(pm10_values.as_ref())
            .map_or(0, Vec::len),
    };

    let pm25_aqi = pm25_values.and_then(|v| pollutant_sub_indices(&v, Pollutant::Pm25, pack));
    let pm10_aqi = pm10_values.and_then(|v| pollutant_sub_indices(&v, Pollutant::Pm10, pack));

    let overall: Vec<Option<f64>> = (0..rows)
        .map(|i| {
            let a = pm25_aqi.as_ref().and_then(|v| v[i]);
            let b = pm10_aqi.as_ref().and_then(|v| v[i]);
            match (a, b) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        })
        .collect();

    let category = pack.categories.as_ref().map(|cats| {
        overall
            .iter()
            .map(|v| v.and_then(|v| classify(v, cats)).map(|c| c.name.clone()))
            .collect()
    });

    Ok(AqiTable {
        index,
        pm25: pm25_aqi,
        pm10: pm10_aqi,
        overall,
        category,
    })
}

type Aligned = (SeriesIndex, Option<Vec<Option<f64>>>, Option<Vec<Option<f64>>>);

fn align(a: Option<&Series>, b: Option<&Series>) -> Result<Aligned, AnalysisError> {
    match (a, b) {
        (None, None) => Ok((SeriesIndex::Time(Vec::new()), None, None)),
        (Some(a), None) => Ok((a.index.clone(), Some(a.values.clone()), None)),
        (None, Some(b)) => Ok((b.index.clone(), None, Some(b.values.clone()))),
        (Some(a), Some(b)) => match (&a.index, &b.index) {
            (SeriesIndex::Time(ta), SeriesIndex::Time(tb)) if ta == tb => Ok((
                a.index.clone(),
                Some(a.values.clone()),
                Some(b.values.clone()),
            )),
            (SeriesIndex::Time(ta), SeriesIndex::Time(tb)) => {
                let mut rows: BTreeMap<Timestamp, (Option<f64>, Option<f64>)> = BTreeMap::new();
                for (t, v) in ta.iter().zip(&a.values) {
                    rows.entry(*t).or_default().0 = *v;
                }
                for (t, v) in tb.iter().zip(&b.values) {
                    rows.entry(*t).or_default().1 = *v;
                }
                let times = rows.keys().copied().collect();
                let (va, vb): (Vec<_>, Vec<_>) = rows.into_values().unzip();
                Ok((SeriesIndex::Time(times), Some(va), Some(vb)))
            }
            (SeriesIndex::Position, SeriesIndex::Position) => {
                let n = a.len().max(b.len());
                let pad = |v: &[Option<f64>]| {
                    let mut v = v.to_vec();
                    v.resize(n, None);
                    v
                };
                Ok((SeriesIndex::Position, Some(pad(&a.values)), Some(pad(&b.values))))
            }
            _ => Err(AnalysisError::NotTimeIndexed("aligning PM2.5 and PM10")),
        },
    }
}

// ---------------------------------------------------------------------------
// Averaging windows
// ---------------------------------------------------------------------------

/// Concentration averaging applied before the index lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Averaging {
    #[default]
    Instant,
    Rolling24h,
    Daily,
}

impl FromStr for Averaging {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "instant" => Ok(Averaging::Instant),
            "rolling_24h" | "24h" => Ok(Averaging::Rolling24h),
            "daily" => Ok(Averaging::Daily),
            other => Err(AnalysisError::UnknownChoice {
                what: "averaging mode",
                value: other.to_string(),
            }),
        }
    }
}

/// `Instant` passes through; `Rolling24h` is a trailing 24 h mean
/// (`min_periods = 1`); `Daily` is one mean per UTC calendar day, including
/// days without samples.
pub fn apply_averaging(series: &Series, mode: Averaging) -> Result<Series, AnalysisError> {
    match mode {
        Averaging::Instant => Ok(series.clone()),
        Averaging::Rolling24h => {
            let times = series.times("24 h rolling average")?;
            let values = rolling_mean_time(times, &series.values, TimeDelta::hours(24));
            Ok(series.with_values(values))
        }
        Averaging::Daily => daily_mean(series),
    }
}

fn daily_mean(series: &Series) -> Result<Series, AnalysisError> {
    let times = series.times("daily average")?;
    let (Some(first), Some(last)) = (times.iter().min(), times.iter().max()) else {
        return Ok(Series::with_times(&series.name, Vec::new(), Vec::new()));
    };

    let mut sums: BTreeMap<chrono::NaiveDate, (f64, usize)> = BTreeMap::new();
    let mut day = first.date_naive();
    while day <= last.date_naive() {
        sums.insert(day, (0.0, 0));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    for (t, v) in times.iter().zip(&series.values) {
        if let (Some(v), Some(acc)) = (v, sums.get_mut(&t.date_naive())) {
            acc.0 += v;
            acc.1 += 1;
        }
    }

    let (labels, values) = sums
        .into_iter()
        .map(|(d, (sum, n))| {
            let label = d.and_time(NaiveTime::MIN).and_utc();
            (label, (n > 0).then(|| sum / n as f64))
        })
        .unzip();
    Ok(Series::with_times(&series.name, labels, values))
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTime {
    pub name: String,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiSummary {
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Seconds attributed to each category, in pack order. Each sample
    /// contributes the time elapsed since the previous sample.
    pub time_in_category: Option<Vec<CategoryTime>>,
}

/// Max / mean of an AQI series, plus time spent in each category.
pub fn aqi_summary(series: &Series, categories: Option<&[Category]>) -> Result<AqiSummary, AnalysisError> {
    let valid: Vec<f64> = series.valid_values().collect();
    let max = valid.iter().copied().reduce(f64::max);
    let mean = (!valid.is_empty()).then(|| valid.iter().sum::<f64>() / valid.len() as f64);

    let time_in_category = match categories {
        Some(cats) if !cats.is_empty() => {
            let deltas = elapsed_deltas(series.times("time in AQI category")?);
            let mut seconds = vec![0.0; cats.len()];
            for (v, dt) in series.values.iter().zip(&deltas) {
                let Some(v) = v else { continue };
                if let Some(i) = cats.iter().position(|c| c.contains(*v)) {
                    seconds[i] += dt;
                }
            }
            Some(
                cats.iter()
                    .zip(seconds)
                    .map(|(c, s)| CategoryTime {
                        name: c.name.clone(),
                        seconds: s,
                    })
                    .collect(),
            )
        }
        _ => None,
    };

    Ok(AqiSummary {
        max,
        mean,
        time_in_category,
    })
}

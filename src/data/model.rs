use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ProcessingConfig;
use crate::error::AnalysisError;

/// All timestamps are timezone-aware UTC instants.
pub type Timestamp = DateTime<Utc>;

/// One boolean per row.
pub type Mask = Vec<bool>;

// ---------------------------------------------------------------------------
// Column / Table – the time-indexed tabular container
// ---------------------------------------------------------------------------

/// A named column of nullable floats. `None` is an explicit missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of non-missing cells.
    pub fn count_valid(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// A time-indexed table: one timestamp per row and any number of columns of
/// the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub timestamps: Vec<Timestamp>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(timestamps: Vec<Timestamp>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append a column; its length must match the row count.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.len());
        self.columns.push(Column::new(name, values));
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// A time-indexed copy of one column.
    pub fn series(&self, name: &str) -> Option<Series> {
        self.column(name)
            .map(|c| Series::with_times(&c.name, self.timestamps.clone(), c.values.clone()))
    }

    /// Rows whose timestamp lies within `[start, end]`.
    pub fn between(&self, start: Timestamp, end: Timestamp) -> Table {
        let keep: Vec<usize> = self
            .timestamps
            .iter()
            .enumerate()
            .filter(|(_, t)| **t >= start && **t <= end)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&keep)
    }

    /// A new table containing only the given row indices, in that order.
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        Table {
            timestamps: rows.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), rows.iter().map(|&i| c.values[i]).collect()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Series – one column, optionally carrying its time index
// ---------------------------------------------------------------------------

/// The index of a [`Series`]: real timestamps, or bare row positions.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesIndex {
    Time(Vec<Timestamp>),
    Position,
}

/// An ordered sequence of nullable values. Time-weighted operations require a
/// [`SeriesIndex::Time`] index and fail with
/// [`AnalysisError::NotTimeIndexed`] otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub index: SeriesIndex,
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn with_times(name: &str, times: Vec<Timestamp>, values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        Self {
            name: name.to_string(),
            index: SeriesIndex::Time(times),
            values,
        }
    }

    /// Convenience constructor from fully valid samples.
    pub fn from_points(name: &str, points: &[(Timestamp, f64)]) -> Self {
        Self::with_times(
            name,
            points.iter().map(|(t, _)| *t).collect(),
            points.iter().map(|(_, v)| Some(*v)).collect(),
        )
    }

    pub fn positional(name: &str, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.to_string(),
            index: SeriesIndex::Position,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The timestamps, or an error naming the operation that needed them.
    pub fn times(&self, operation: &'static str) -> Result<&[Timestamp], AnalysisError> {
        match &self.index {
            SeriesIndex::Time(times) => Ok(times),
            SeriesIndex::Position => Err(AnalysisError::NotTimeIndexed(operation)),
        }
    }

    /// Same index, new values.
    pub fn with_values(&self, values: Vec<Option<f64>>) -> Series {
        Series {
            name: self.name.clone(),
            index: self.index.clone(),
            values,
        }
    }

    /// Samples whose timestamp lies within `[start, end]`. A positional series
    /// is returned unchanged.
    pub fn between(&self, start: Timestamp, end: Timestamp) -> Series {
        match &self.index {
            SeriesIndex::Position => self.clone(),
            SeriesIndex::Time(times) => {
                let (t, v): (Vec<Timestamp>, Vec<Option<f64>>) = times
                    .iter()
                    .zip(&self.values)
                    .filter(|(t, _)| **t >= start && **t <= end)
                    .map(|(t, v)| (*t, *v))
                    .unzip();
                Series::with_times(&self.name, t, v)
            }
        }
    }

    /// Non-missing `(timestamp, value)` pairs sorted by time.
    pub fn valid_points(&self, operation: &'static str) -> Result<Vec<(Timestamp, f64)>, AnalysisError> {
        let times = self.times(operation)?;
        let mut points: Vec<(Timestamp, f64)> = times
            .iter()
            .zip(&self.values)
            .filter_map(|(t, v)| v.map(|v| (*t, v)))
            .collect();
        points.sort_by_key(|(t, _)| *t);
        Ok(points)
    }

    /// Iterator over the non-missing values.
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }
}

/// Elapsed seconds between consecutive timestamps; the first entry is 0.
pub fn elapsed_deltas(times: &[Timestamp]) -> Vec<f64> {
    let mut out = Vec::with_capacity(times.len());
    for (i, t) in times.iter().enumerate() {
        if i == 0 {
            out.push(0.0);
        } else {
            out.push(seconds_between(times[i - 1], *t));
        }
    }
    out
}

/// `b - a` in fractional seconds.
pub fn seconds_between(a: Timestamp, b: Timestamp) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Dataset – one imported sensor log
// ---------------------------------------------------------------------------

/// Why a cell was marked invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskReason {
    Null,
    Negative,
    InactiveZero,
    BelowMin,
    AboveMax,
    NonPositive,
}

impl fmt::Display for MaskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaskReason::Null => "null",
            MaskReason::Negative => "negative",
            MaskReason::InactiveZero => "inactive_zero",
            MaskReason::BelowMin => "below_min",
            MaskReason::AboveMax => "above_max",
            MaskReason::NonPositive => "non_positive",
        };
        write!(f, "{s}")
    }
}

/// Per-column, per-reason invalid cell counts.
pub type MaskReasons = BTreeMap<String, BTreeMap<MaskReason, usize>>;

/// A suspicious jump in the sampling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Diagnostic information gathered while importing and cleaning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetMetadata {
    pub path: Option<PathBuf>,
    pub delimiter: char,
    pub gaps: Vec<Gap>,
    pub mask_reasons: MaskReasons,
    /// Canonical metric columns present, in canonical order.
    pub columns: Vec<String>,
    pub resample_interval: Option<String>,
    pub resampled_rows: Option<usize>,
    /// Rows discarded because their timestamp cell was not numeric.
    pub dropped_rows: usize,
    /// Rows discarded by timestamp de-duplication.
    pub duplicate_rows: usize,
}

/// One imported log: the raw table plus everything derived from it under a
/// [`ProcessingConfig`].
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub config: ProcessingConfig,
    /// Parsed, sorted and de-duplicated – but not masked.
    pub raw: Table,
    /// Same shape as `raw`, invalid cells set to `None`.
    pub clean: Table,
    /// Validity per column (`true` = valid).
    pub masks: BTreeMap<String, Mask>,
    /// Diagnostic flags per column (flatlines, multi-channel stall).
    pub flags: BTreeMap<String, Mask>,
    pub metadata: DatasetMetadata,
    pub resampled: Option<Table>,
}

impl Dataset {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The table analyses should read: the resampled one when requested and
    /// available, otherwise the clean one.
    pub fn analysis_table(&self) -> &Table {
        match (&self.resampled, self.config.use_resampled) {
            (Some(resampled), true) => resampled,
            _ => &self.clean,
        }
    }

    /// Count of rows flagged in a diagnostic mask.
    pub fn flagged_count(&self, column: &str) -> usize {
        self.flags
            .get(column)
            .map(|m| m.iter().filter(|f| **f).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn positional_series_refuses_time_access() {
        let s = Series::positional("x", vec![Some(1.0)]);
        assert!(matches!(s.times("test"), Err(AnalysisError::NotTimeIndexed("test"))));
    }

    #[test]
    fn between_is_inclusive() {
        let mut table = Table::new(vec![ts(0), ts(60), ts(120), ts(180)]);
        table.push_column("co2", vec![Some(1.0), None, Some(3.0), Some(4.0)]);
        let cut = table.between(ts(60), ts(120));
        assert_eq!(cut.timestamps, vec![ts(60), ts(120)]);
        assert_eq!(cut.column("co2").unwrap().values, vec![None, Some(3.0)]);

        let series = table.series("co2").unwrap().between(ts(120), ts(500));
        assert_eq!(series.values, vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn elapsed_deltas_start_at_zero() {
        assert_eq!(elapsed_deltas(&[ts(0), ts(30), ts(90)]), vec![0.0, 30.0, 60.0]);
        assert!(elapsed_deltas(&[]).is_empty());
    }
}

use chrono::{DateTime, TimeDelta};

use super::aliases::FLAGS;
use super::model::{Table, Timestamp};

/// Resample a table onto a fixed, epoch-aligned grid.
///
/// * Data columns are averaged over the non-missing samples of each bucket.
/// * The bitfield `flags` column is never averaged: each bucket takes the
///   last known flags value at or before the bucket's start (forward fill).
/// * Buckets without samples are kept, with missing data values, so the
///   output has one row per interval from the first to the last sample.
pub fn resample(table: &Table, interval: TimeDelta) -> Table {
    let step = interval.num_milliseconds();
    if table.is_empty() || step <= 0 {
        return Table::new(Vec::new());
    }

    let bucket_of = |t: &Timestamp| t.timestamp_millis().div_euclid(step);
    let first = bucket_of(&table.timestamps[0]);
    let last = bucket_of(&table.timestamps[table.len() - 1]);
    let n_buckets = (last - first + 1) as usize;

    let labels: Vec<Timestamp> = (0..n_buckets as i64)
        .filter_map(|b| DateTime::from_timestamp_millis((first + b) * step))
        .collect();
    let mut out = Table::new(labels);

    let rows_bucket: Vec<usize> = table
        .timestamps
        .iter()
        .map(|t| (bucket_of(t) - first) as usize)
        .collect();

    for column in &table.columns {
        let values = if column.name == FLAGS {
            forward_fill_at_labels(&table.timestamps, &column.values, &out.timestamps)
        } else {
            let mut sums = vec![0.0; n_buckets];
            let mut counts = vec![0usize; n_buckets];
            for (bucket, value) in rows_bucket.iter().zip(&column.values) {
                if let Some(v) = value {
                    sums[*bucket] += v;
                    counts[*bucket] += 1;
                }
            }
            sums.iter()
                .zip(&counts)
                .map(|(s, c)| (*c > 0).then(|| s / *c as f64))
                .collect()
        };
        out.push_column(column.name.clone(), values);
    }

    log::debug!(
        "resampled {} rows into {} buckets of {} ms",
        table.len(),
        out.len(),
        step
    );
    out
}

/// For every label, the last non-missing value whose timestamp is <= label.
fn forward_fill_at_labels(
    times: &[Timestamp],
    values: &[Option<f64>],
    labels: &[Timestamp],
) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(labels.len());
    let mut cursor = 0;
    let mut last = None;
    for label in labels {
        while cursor < times.len() && times[cursor] <= *label {
            if values[cursor].is_some() {
                last = values[cursor];
            }
            cursor += 1;
        }
        out.push(last);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn averages_data_and_forward_fills_flags() {
        let mut table = Table::new(vec![ts(0), ts(60), ts(120), ts(180)]);
        table.push_column("flags", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        table.push_column("co2", vec![Some(400.0), Some(500.0), None, Some(700.0)]);

        let out = resample(&table, TimeDelta::minutes(2));
        assert_eq!(out.timestamps, vec![ts(0), ts(120)]);
        assert_eq!(out.column("co2").unwrap().values, vec![Some(450.0), Some(700.0)]);
        // Never averaged: 1.5 / 3.5 would be meaningless for a bitfield.
        assert_eq!(out.column("flags").unwrap().values, vec![Some(1.0), Some(3.0)]);
    }

    #[test]
    fn empty_buckets_are_kept() {
        let mut table = Table::new(vec![ts(0), ts(600)]);
        table.push_column("pm2_5", vec![Some(1.0), Some(3.0)]);
        let out = resample(&table, TimeDelta::minutes(3));
        // buckets at 0, 180, 360, 540
        assert_eq!(out.len(), 4);
        assert_eq!(
            out.column("pm2_5").unwrap().values,
            vec![Some(1.0), None, None, Some(3.0)]
        );
    }

    #[test]
    fn buckets_are_epoch_aligned() {
        let mut table = Table::new(vec![ts(70), ts(100)]);
        table.push_column("rh", vec![Some(40.0), Some(42.0)]);
        let out = resample(&table, TimeDelta::minutes(1));
        assert_eq!(out.timestamps, vec![ts(60)]);
        assert_eq!(out.column("rh").unwrap().values, vec![Some(41.0)]);
    }
}

use std::collections::BTreeMap;

use chrono::TimeDelta;

use super::aliases::ColumnClass;
use super::model::{Mask, Table, Timestamp};
use crate::config::FlatlineConfig;

/// Key of the derived "several particulate channels stuck at once" flag.
pub const MULTI_CHANNEL_FLATLINE: &str = "multi_channel_flatline";

/// Flag runs of bit-identical consecutive values in one column.
///
/// A missing cell always ends a run and is never flagged itself. A run is
/// flagged when it is at least `min_samples` long OR spans at least
/// `min_minutes`.
pub fn flatline_mask(times: &[Timestamp], values: &[Option<f64>], cfg: &FlatlineConfig) -> Mask {
    let n = values.len();
    let mut mask = vec![false; n];
    // A span threshold that is not a representable duration never triggers.
    let min_span = cfg
        .min_minutes
        .is_finite()
        .then(|| TimeDelta::try_milliseconds((cfg.min_minutes * 60_000.0).round() as i64))
        .flatten();

    let mut i = 0;
    while i < n {
        let Some(first) = values[i] else {
            i += 1;
            continue;
        };
        let mut end = i + 1;
        while end < n && values[end].is_some_and(|v| v.to_bits() == first.to_bits()) {
            end += 1;
        }

        let run_len = end - i;
        let span = times[end - 1] - times[i];
        if run_len >= cfg.min_samples || min_span.is_some_and(|m| span >= m) {
            mask[i..end].fill(true);
        }
        i = end;
    }
    mask
}

/// Flatline masks for every data column, plus [`MULTI_CHANNEL_FLATLINE`]
/// when the table holds particulate channels.
pub fn flag_flatlines(table: &Table, cfg: &FlatlineConfig) -> BTreeMap<String, Mask> {
    let mut flags = BTreeMap::new();
    if table.is_empty() {
        return flags;
    }

    for column in &table.columns {
        if ColumnClass::of(&column.name) == ColumnClass::Timestamp {
            continue;
        }
        flags.insert(
            column.name.clone(),
            flatline_mask(&table.timestamps, &column.values, cfg),
        );
    }

    let particulate: Vec<&Mask> = table
        .columns
        .iter()
        .filter(|c| ColumnClass::of(&c.name).is_particulate())
        .filter_map(|c| flags.get(&c.name))
        .collect();
    if !particulate.is_empty() {
        let combined: Mask = (0..table.len())
            .map(|row| {
                particulate.iter().filter(|m| m[row]).count() >= cfg.multi_channel_threshold
            })
            .collect();
        flags.insert(MULTI_CHANNEL_FLATLINE.to_string(), combined);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono::TimeZone;

    fn minutes(n: usize) -> Vec<Timestamp> {
        (0..n as i64).map(|i| Utc.timestamp_opt(i * 60, 0).unwrap()).collect()
    }

    #[test]
    fn run_length_triggers_flag() {
        let cfg = FlatlineConfig {
            min_samples: 3,
            min_minutes: 1000.0,
            multi_channel_threshold: 3,
        };
        let values = vec![Some(1.0), Some(2.0), Some(2.0), Some(2.0), Some(3.0)];
        let mask = flatline_mask(&minutes(5), &values, &cfg);
        assert_eq!(mask, vec![false, true, true, true, false]);
    }

    #[test]
    fn duration_alone_triggers_flag() {
        let cfg = FlatlineConfig {
            min_samples: 100,
            min_minutes: 2.0,
            multi_channel_threshold: 3,
        };
        // Two samples two minutes apart are enough.
        let times = vec![
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(120, 0).unwrap(),
            Utc.timestamp_opt(180, 0).unwrap(),
        ];
        let mask = flatline_mask(&times, &[Some(5.0), Some(5.0), Some(6.0)], &cfg);
        assert_eq!(mask, vec![true, true, false]);
    }

    #[test]
    fn unrepresentable_span_falls_back_to_run_length() {
        let values = vec![Some(2.0), Some(2.0), Some(2.0), Some(5.0)];
        for min_minutes in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -1e300] {
            let cfg = FlatlineConfig {
                min_samples: 3,
                min_minutes,
                multi_channel_threshold: 3,
            };
            let mask = flatline_mask(&minutes(4), &values, &cfg);
            assert_eq!(mask, vec![true, true, true, false], "{min_minutes}");
        }
    }

    #[test]
    fn missing_breaks_runs() {
        let cfg = FlatlineConfig {
            min_samples: 3,
            min_minutes: 1000.0,
            multi_channel_threshold: 3,
        };
        let values = vec![Some(2.0), Some(2.0), None, Some(2.0), Some(2.0)];
        let mask = flatline_mask(&minutes(5), &values, &cfg);
        assert_eq!(mask, vec![false; 5]);
    }

    #[test]
    fn multi_channel_needs_threshold_channels() {
        let cfg = FlatlineConfig {
            min_samples: 3,
            min_minutes: 1000.0,
            multi_channel_threshold: 2,
        };
        let mut table = Table::new(minutes(4));
        table.push_column("pm2_5", vec![Some(1.0), Some(1.0), Some(1.0), Some(2.0)]);
        table.push_column("pn10_0", vec![Some(4.0), Some(4.0), Some(4.0), Some(4.0)]);
        table.push_column("co2", vec![Some(400.0); 4]);
        let flags = flag_flatlines(&table, &cfg);
        assert_eq!(flags["co2"], vec![true; 4]);
        // co2 is not particulate, so row 3 has only one stuck channel.
        assert_eq!(flags[MULTI_CHANNEL_FLATLINE], vec![true, true, true, false]);
    }

    #[test]
    fn no_particulate_no_multi_channel_flag() {
        let mut table = Table::new(minutes(2));
        table.push_column("co2", vec![Some(400.0), Some(410.0)]);
        let flags = flag_flatlines(&table, &FlatlineConfig::default());
        assert!(!flags.contains_key(MULTI_CHANNEL_FLATLINE));
    }
}

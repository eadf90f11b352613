use std::collections::BTreeMap;

use super::aliases::ColumnClass;
use super::model::{Mask, MaskReason, MaskReasons, Table};
use crate::config::{ProcessingConfig, VocNoxZeroMode};

/// Built-in plausible ranges; per-dataset overrides are merged on top.
pub const DEFAULT_RANGES: &[(&str, (f64, f64))] = &[
    ("co2", (350.0, 20_000.0)),
    ("temp_c", (-40.0, 85.0)),
    ("rh", (0.0, 100.0)),
    ("pressure", (300.0, 1100.0)),
];

/// Output of [`apply_validity_masks`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaskResult {
    pub masks: BTreeMap<String, Mask>,
    pub clean: Table,
    pub reasons: MaskReasons,
}

/// Effective `[lo, hi]` ranges for a config.
pub fn plausible_ranges(config: &ProcessingConfig) -> BTreeMap<String, (f64, f64)> {
    let mut ranges: BTreeMap<String, (f64, f64)> = DEFAULT_RANGES
        .iter()
        .map(|(k, r)| (k.to_string(), *r))
        .collect();
    ranges.extend(config.plausible_ranges.iter().map(|(k, r)| (k.clone(), *r)));
    ranges
}

/// Build a validity mask per column and a clean copy of `table` with invalid
/// cells set to missing.
///
/// Pure function of its inputs: the input table is never modified, and
/// applying it again to the same table and config gives the same result.
pub fn apply_validity_masks(table: &Table, config: &ProcessingConfig) -> MaskResult {
    let ranges = plausible_ranges(config);
    let mut clean = table.clone();
    let mut masks = BTreeMap::new();
    let mut reasons: MaskReasons = BTreeMap::new();

    for column in &mut clean.columns {
        let class = ColumnClass::of(&column.name);
        if class == ColumnClass::Timestamp {
            continue;
        }

        let mut counts: BTreeMap<MaskReason, usize> = BTreeMap::new();
        let mut valid = Vec::with_capacity(column.values.len());

        for cell in &column.values {
            let reason = match *cell {
                None => Some(MaskReason::Null),
                Some(v) => classify_cell(class, &column.name, v, config, &ranges),
            };
            if let Some(reason) = reason {
                *counts.entry(reason).or_default() += 1;
            }
            valid.push(reason.is_none());
        }

        for (cell, ok) in column.values.iter_mut().zip(&valid) {
            if !ok {
                *cell = None;
            }
        }

        masks.insert(column.name.clone(), valid);
        reasons.insert(column.name.clone(), counts);
    }

    MaskResult {
        masks,
        clean,
        reasons,
    }
}

/// Reason a present value is invalid, or `None` when it passes.
fn classify_cell(
    class: ColumnClass,
    name: &str,
    value: f64,
    config: &ProcessingConfig,
    ranges: &BTreeMap<String, (f64, f64)>,
) -> Option<MaskReason> {
    match class {
        ColumnClass::Timestamp | ColumnClass::Flags => None,
        // Zero is a legitimate particulate reading.
        ColumnClass::ParticleMass | ColumnClass::ParticleCount => {
            (value < 0.0).then_some(MaskReason::Negative)
        }
        ColumnClass::GasIndex => {
            if value < 0.0 {
                Some(MaskReason::Negative)
            } else if value == 0.0 && config.voc_nox_zero_mode == VocNoxZeroMode::MaskInactive {
                Some(MaskReason::InactiveZero)
            } else {
                None
            }
        }
        ColumnClass::Co2Uncompensated | ColumnClass::Other => {
            if let Some(&(lo, hi)) = ranges.get(name) {
                if value < lo {
                    Some(MaskReason::BelowMin)
                } else if value > hi {
                    Some(MaskReason::AboveMax)
                } else {
                    None
                }
            } else if class == ColumnClass::Co2Uncompensated {
                (value <= 0.0).then_some(MaskReason::NonPositive)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn table(columns: &[(&str, Vec<Option<f64>>)]) -> Table {
        let n = columns[0].1.len();
        let mut t = Table::new((0..n as i64).map(|i| Utc.timestamp_opt(i * 60, 0).unwrap()).collect());
        for (name, values) in columns {
            t.push_column(*name, values.clone());
        }
        t
    }

    #[test]
    fn particulate_zeros_remain_valid() {
        let t = table(&[
            ("pm2_5", vec![Some(0.0), Some(5.0), Some(-1.0)]),
            ("pn10_0", vec![Some(0.0), Some(10.0), None]),
        ]);
        let result = apply_validity_masks(&t, &ProcessingConfig::default());
        assert_eq!(result.masks["pm2_5"], vec![true, true, false]);
        assert_eq!(result.masks["pn10_0"], vec![true, true, false]);
        assert_eq!(result.reasons["pm2_5"][&MaskReason::Negative], 1);
        assert_eq!(result.reasons["pn10_0"][&MaskReason::Null], 1);
        assert_eq!(result.clean.column("pm2_5").unwrap().values[2], None);
    }

    #[test]
    fn voc_nox_zero_masked_by_default() {
        let t = table(&[
            ("voc", vec![Some(0.0), Some(10.0)]),
            ("nox", vec![Some(0.0), Some(5.0)]),
        ]);
        let result = apply_validity_masks(&t, &ProcessingConfig::default());
        assert_eq!(result.masks["voc"], vec![false, true]);
        assert_eq!(result.masks["nox"], vec![false, true]);
        assert_eq!(result.reasons["voc"][&MaskReason::InactiveZero], 1);

        let keep = ProcessingConfig {
            voc_nox_zero_mode: VocNoxZeroMode::KeepRaw,
            ..Default::default()
        };
        let result = apply_validity_masks(&t, &keep);
        assert_eq!(result.masks["voc"], vec![true, true]);
    }

    #[test]
    fn ranges_and_overrides() {
        let t = table(&[
            ("co2", vec![Some(300.0), Some(800.0), Some(25_000.0)]),
            ("rh", vec![Some(-1.0), Some(50.0), Some(101.0)]),
            ("co2_uncomp", vec![Some(0.0), Some(500.0), Some(-3.0)]),
            ("flags", vec![Some(-7.0), None, Some(0.0)]),
            ("mystery", vec![Some(-1e9), Some(1.0), None]),
        ]);
        let result = apply_validity_masks(&t, &ProcessingConfig::default());
        assert_eq!(result.masks["co2"], vec![false, true, false]);
        assert_eq!(result.reasons["co2"][&MaskReason::BelowMin], 1);
        assert_eq!(result.reasons["co2"][&MaskReason::AboveMax], 1);
        assert_eq!(result.masks["rh"], vec![false, true, false]);
        assert_eq!(result.masks["co2_uncomp"], vec![false, true, false]);
        assert_eq!(result.reasons["co2_uncomp"][&MaskReason::NonPositive], 2);
        assert_eq!(result.masks["flags"], vec![true, false, true]);
        assert_eq!(result.masks["mystery"], vec![true, true, false]);

        let mut cfg = ProcessingConfig::default();
        cfg.plausible_ranges.insert("co2".into(), (200.0, 30_000.0));
        let result = apply_validity_masks(&t, &cfg);
        assert_eq!(result.masks["co2"], vec![true, true, true]);
    }

    #[test]
    fn masking_is_idempotent() {
        let t = table(&[
            ("co2", vec![Some(300.0), Some(800.0), None]),
            ("voc", vec![Some(0.0), Some(12.0), Some(-2.0)]),
        ]);
        let cfg = ProcessingConfig::default();
        let first = apply_validity_masks(&t, &cfg);
        let second = apply_validity_masks(&t, &cfg);
        assert_eq!(first, second);
        // The input is untouched.
        assert_eq!(t.column("co2").unwrap().values[0], Some(300.0));
        // Masking the clean output again invalidates nothing new.
        let again = apply_validity_masks(&first.clean, &cfg);
        assert_eq!(again.clean, first.clean);
    }
}

use std::collections::BTreeMap;

use super::aliases::{CANONICAL_ORDER, ColumnClass, TIMESTAMP};
use super::flatline::flag_flatlines;
use super::gaps::detect_gaps;
use super::masks::apply_validity_masks;
use super::model::{Dataset, DatasetMetadata, Gap, Mask, MaskReasons, Table};
use super::resample::resample;
use crate::config::ProcessingConfig;
use crate::duration::parse_duration;
use crate::error::ImportError;

// ---------------------------------------------------------------------------
// Derivation: raw table + config → clean / masks / diagnostics
// ---------------------------------------------------------------------------

/// Everything derived from a raw table under one [`ProcessingConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub clean: Table,
    pub masks: BTreeMap<String, Mask>,
    pub flags: BTreeMap<String, Mask>,
    pub reasons: MaskReasons,
    pub gaps: Vec<Gap>,
    pub resampled: Option<Table>,
}

/// Mask, resample, detect gaps and (optionally) flag flatlines.
///
/// A pure function of `(raw, config)`.
pub fn derive(raw: &Table, config: &ProcessingConfig) -> Result<Derived, ImportError> {
    let masked = apply_validity_masks(raw, config);
    let mut clean = masked.clean;
    let mut masks = masked.masks;

    let resampled = match config.resample_interval.as_deref().map(str::trim) {
        Some(interval) if !interval.is_empty() => {
            let step = parse_duration(interval).map_err(|source| {
                ImportError::InvalidResampleInterval {
                    interval: interval.to_string(),
                    source,
                }
            })?;
            Some(resample(&clean, step))
        }
        _ => None,
    };

    let gaps = detect_gaps(&clean.timestamps, config.gap_factor);

    let mut flags = BTreeMap::new();
    if config.flatline_diag_enabled {
        flags = flag_flatlines(&clean, &config.flatline);
        if config.flatline_automask {
            automask_particulates(&mut clean, &mut masks, &flags);
        }
    }

    Ok(Derived {
        clean,
        masks,
        flags,
        reasons: masked.reasons,
        gaps,
        resampled,
    })
}

/// Null out flatlined particulate cells and clear their validity.
fn automask_particulates(
    clean: &mut Table,
    masks: &mut BTreeMap<String, Mask>,
    flags: &BTreeMap<String, Mask>,
) {
    for column in &mut clean.columns {
        if !ColumnClass::of(&column.name).is_particulate() {
            continue;
        }
        let Some(flagged) = flags.get(&column.name) else {
            continue;
        };
        let mut masked = 0usize;
        for (cell, stuck) in column.values.iter_mut().zip(flagged) {
            if *stuck && cell.is_some() {
                *cell = None;
                masked += 1;
            }
        }
        if let Some(valid) = masks.get_mut(&column.name) {
            for (v, stuck) in valid.iter_mut().zip(flagged) {
                *v &= !*stuck;
            }
        }
        if masked > 0 {
            log::debug!("flatline automask removed {masked} cells from {}", column.name);
        }
    }
}

/// Provenance of a raw table, carried into [`DatasetMetadata`].
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub path: Option<std::path::PathBuf>,
    pub delimiter: char,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
}

impl Dataset {
    /// Build a dataset from an already parsed raw table.
    pub fn from_raw(
        name: impl Into<String>,
        raw: Table,
        config: ProcessingConfig,
        provenance: Provenance,
    ) -> Result<Self, ImportError> {
        let derived = derive(&raw, &config)?;

        let mut present: Vec<&str> = raw.column_names();
        present.push(TIMESTAMP);
        let columns = CANONICAL_ORDER
            .iter()
            .filter(|c| present.contains(c))
            .map(|c| c.to_string())
            .collect();

        let metadata = DatasetMetadata {
            path: provenance.path,
            delimiter: provenance.delimiter,
            gaps: derived.gaps,
            mask_reasons: derived.reasons,
            columns,
            resample_interval: config.resample_interval.clone(),
            resampled_rows: derived.resampled.as_ref().map(Table::len),
            dropped_rows: provenance.dropped_rows,
            duplicate_rows: provenance.duplicate_rows,
        };

        Ok(Dataset {
            name: name.into(),
            config,
            raw,
            clean: derived.clean,
            masks: derived.masks,
            flags: derived.flags,
            metadata,
            resampled: derived.resampled,
        })
    }

    /// Re-derive everything from `raw` under a new config, without re-reading
    /// the source. The dataset is replaced by value.
    pub fn reprocess(&self, config: ProcessingConfig) -> Result<Dataset, ImportError> {
        let provenance = Provenance {
            path: self.metadata.path.clone(),
            delimiter: self.metadata.delimiter,
            dropped_rows: self.metadata.dropped_rows,
            duplicate_rows: self.metadata.duplicate_rows,
        };
        Dataset::from_raw(self.name.clone(), self.raw.clone(), config, provenance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::flatline::MULTI_CHANNEL_FLATLINE;
    use crate::data::model::Timestamp;
    use chrono::{TimeZone, Utc};

    fn raw_table() -> Table {
        let times: Vec<Timestamp> = (0..8).map(|i| Utc.timestamp_opt(i * 60, 0).unwrap()).collect();
        let mut t = Table::new(times);
        t.push_column("pm2_5", vec![Some(3.0); 8]);
        t.push_column("pm10", vec![Some(5.0); 8]);
        t.push_column("pn10_0", vec![Some(9.0); 8]);
        t.push_column(
            "co2",
            vec![Some(500.0), Some(510.0), Some(300.0), Some(520.0), Some(530.0), Some(540.0), Some(550.0), Some(560.0)],
        );
        t
    }

    #[test]
    fn derivation_is_repeatable() {
        let raw = raw_table();
        let cfg = ProcessingConfig::default();
        assert_eq!(derive(&raw, &cfg).unwrap(), derive(&raw, &cfg).unwrap());
    }

    #[test]
    fn automask_clears_stuck_particulates_only() {
        let raw = raw_table();
        let cfg = ProcessingConfig {
            flatline_automask: true,
            ..Default::default()
        };
        let derived = derive(&raw, &cfg).unwrap();
        assert!(derived.flags[MULTI_CHANNEL_FLATLINE].iter().all(|f| *f));
        assert_eq!(derived.clean.column("pm2_5").unwrap().count_valid(), 0);
        assert!(derived.masks["pm10"].iter().all(|v| !v));
        // co2 is diagnosed but never automasked; only the out-of-range cell goes.
        assert_eq!(derived.clean.column("co2").unwrap().count_valid(), 7);
    }

    #[test]
    fn diagnostics_can_be_disabled() {
        let cfg = ProcessingConfig {
            flatline_diag_enabled: false,
            ..Default::default()
        };
        let derived = derive(&raw_table(), &cfg).unwrap();
        assert!(derived.flags.is_empty());
    }

    #[test]
    fn bad_resample_interval_is_fatal() {
        let cfg = ProcessingConfig {
            resample_interval: Some("soon".into()),
            ..Default::default()
        };
        assert!(matches!(
            derive(&raw_table(), &cfg),
            Err(ImportError::InvalidResampleInterval { .. })
        ));
    }

    #[test]
    fn reprocess_replaces_derived_state() {
        let ds = Dataset::from_raw("t", raw_table(), ProcessingConfig::default(), Provenance::default())
            .unwrap();
        assert!(ds.resampled.is_none());
        assert_eq!(ds.metadata.columns, vec!["timestamp", "co2", "pm2_5", "pm10", "pn10_0"]);

        let cfg = ProcessingConfig {
            resample_interval: Some("2min".into()),
            use_resampled: true,
            ..Default::default()
        };
        let again = ds.reprocess(cfg).unwrap();
        assert_eq!(again.metadata.resampled_rows, Some(4));
        assert_eq!(again.analysis_table().len(), 4);
        assert_eq!(again.raw, ds.raw);
    }
}

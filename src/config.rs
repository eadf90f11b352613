use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Processing configuration (import / cleaning)
// ---------------------------------------------------------------------------

/// Which row survives when several rows share one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKeep {
    #[default]
    First,
    Last,
}

/// How a literal zero from a VOC/NOx index channel is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocNoxZeroMode {
    /// Zero means the sensor was not yet active: the cell is invalid.
    #[default]
    MaskInactive,
    /// Zero is kept as a valid reading.
    KeepRaw,
}

/// Thresholds for stuck-sensor (flatline) diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatlineConfig {
    /// A run this many samples long is flagged.
    pub min_samples: usize,
    /// A run spanning at least this many minutes is flagged.
    pub min_minutes: f64,
    /// Number of particulate channels that must be flagged at once for the
    /// `multi_channel_flatline` diagnostic.
    pub multi_channel_threshold: usize,
}

impl Default for FlatlineConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_minutes: 10.0,
            multi_channel_threshold: 3,
        }
    }
}

/// Snapshot of every setting that turns a raw table into a clean one.
///
/// Re-applying a config to the same raw table always yields the same clean
/// table, masks and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Field delimiter; detected from the header line when `None`.
    pub delimiter: Option<char>,
    pub dedup_keep: DedupKeep,
    /// A time delta larger than `gap_factor × median delta` is a gap.
    pub gap_factor: f64,
    /// Duration string (e.g. `3min`); resampling is skipped when `None`.
    pub resample_interval: Option<String>,
    /// Analyses read the resampled table instead of the clean one.
    pub use_resampled: bool,
    pub voc_nox_zero_mode: VocNoxZeroMode,
    pub flatline_diag_enabled: bool,
    /// Null out flatlined particulate cells (and clear their validity).
    pub flatline_automask: bool,
    pub flatline: FlatlineConfig,
    /// Per-column `[lo, hi]` overrides merged over the built-in ranges.
    pub plausible_ranges: BTreeMap<String, (f64, f64)>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            dedup_keep: DedupKeep::First,
            gap_factor: 2.0,
            resample_interval: None,
            use_resampled: false,
            voc_nox_zero_mode: VocNoxZeroMode::MaskInactive,
            flatline_diag_enabled: true,
            flatline_automask: false,
            flatline: FlatlineConfig::default(),
            plausible_ranges: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Filter configuration (smoothing views)
// ---------------------------------------------------------------------------

/// What the exponential filter does when it meets a missing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapMode {
    /// Output stays missing; the filter state is kept.
    #[default]
    Skip,
    /// The next valid sample restarts the filter.
    Reset,
    /// The last smoothed value is repeated.
    Hold,
}

/// Smoothing applied to build the "filtered" view of a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Sample count (`"10"`) or duration (`"30min"`).
    #[serde(deserialize_with = "number_or_string")]
    pub sma_window: Option<String>,
    /// Seconds (`"60"`) or duration (`"15min"`).
    #[serde(deserialize_with = "number_or_string")]
    pub ema_tau: Option<String>,
    pub ema_nan_mode: GapMode,
}

/// Accept `10`, `10.5` or `"30min"` for a window-like setting.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Integer(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Setting>::deserialize(deserializer)? {
        None => None,
        Some(Setting::Integer(i)) => Some(i.to_string()),
        Some(Setting::Float(f)) => Some(f.to_string()),
        Some(Setting::Text(s)) => Some(s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_processing_config_uses_defaults() {
        let cfg: ProcessingConfig =
            serde_json::from_str(r#"{ "dedup_keep": "last", "plausible_ranges": { "co2": [400, 5000] } }"#)
                .unwrap();
        assert_eq!(cfg.dedup_keep, DedupKeep::Last);
        assert_eq!(cfg.gap_factor, 2.0);
        assert_eq!(cfg.voc_nox_zero_mode, VocNoxZeroMode::MaskInactive);
        assert_eq!(cfg.plausible_ranges["co2"], (400.0, 5000.0));
        assert!(cfg.flatline_diag_enabled);
    }

    #[test]
    fn filter_config_accepts_numbers_and_strings() {
        let cfg: FilterConfig =
            serde_json::from_str(r#"{ "sma_window": 10, "ema_tau": "15min", "ema_nan_mode": "hold" }"#)
                .unwrap();
        assert_eq!(cfg.sma_window.as_deref(), Some("10"));
        assert_eq!(cfg.ema_tau.as_deref(), Some("15min"));
        assert_eq!(cfg.ema_nan_mode, GapMode::Hold);

        let empty: FilterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, FilterConfig::default());
    }
}

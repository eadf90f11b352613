use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::PackError;

// ---------------------------------------------------------------------------
// Built-in packs (embedded at compile time)
// ---------------------------------------------------------------------------

/// `(id, JSON document)` for every pack shipped with the binary.
pub const BUILTIN_PACKS: &[(&str, &str)] = &[
    ("us_epa_legacy", include_str!("../../standards/us_epa_legacy.json")),
    ("us_epa_2024", include_str!("../../standards/us_epa_2024.json")),
    ("uk_defra_daqi", include_str!("../../standards/uk_defra_daqi.json")),
    ("eu_eea", include_str!("../../standards/eu_eea.json")),
    ("who_guideline", include_str!("../../standards/who_guideline.json")),
    ("in_cpcb_aqi", include_str!("../../standards/in_cpcb_aqi.json")),
    ("cn_mee_aqi", include_str!("../../standards/cn_mee_aqi.json")),
];

pub const DEFAULT_PACK: &str = "us_epa_legacy";

// ---------------------------------------------------------------------------
// Pack document types
// ---------------------------------------------------------------------------

/// One piecewise-linear segment, written as `[conc_low, conc_high, index_low, index_high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Breakpoint {
    pub conc_low: f64,
    pub conc_high: f64,
    pub index_low: f64,
    pub index_high: f64,
}

impl From<[f64; 4]> for Breakpoint {
    fn from([conc_low, conc_high, index_low, index_high]: [f64; 4]) -> Self {
        Self {
            conc_low,
            conc_high,
            index_low,
            index_high,
        }
    }
}

impl From<Breakpoint> for [f64; 4] {
    fn from(b: Breakpoint) -> Self {
        [b.conc_low, b.conc_high, b.index_low, b.index_high]
    }
}

/// Rounding applied to a sub-index. Unknown mode strings mean "no rounding".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rounding {
    /// Half up: `floor(x + 0.5)`.
    #[default]
    Round,
    Floor,
    Truncate,
    Unrounded,
}

impl From<String> for Rounding {
    fn from(mode: String) -> Self {
        match mode.as_str() {
            "round" => Rounding::Round,
            "floor" => Rounding::Floor,
            "truncate" => Rounding::Truncate,
            _ => Rounding::Unrounded,
        }
    }
}

impl From<Rounding> for String {
    fn from(r: Rounding) -> Self {
        match r {
            Rounding::Round => "round",
            Rounding::Floor => "floor",
            Rounding::Truncate => "truncate",
            Rounding::Unrounded => "none",
        }
        .to_string()
    }
}

/// A named AQI band, matched inclusively on `[low, high]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub low: f64,
    pub high: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Category {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// The pollutants an index can be computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
}

impl Pollutant {
    /// Keys a pack may use for this pollutant, in lookup order.
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            Pollutant::Pm25 => &["pm2_5", "pm25"],
            Pollutant::Pm10 => &["pm10"],
        }
    }

    /// The canonical dataset column holding this pollutant.
    pub fn column(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm2_5",
            Pollutant::Pm10 => "pm10",
        }
    }
}

/// One regulatory or advisory AQI scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardPack {
    pub name: String,
    pub breakpoints: BTreeMap<String, Vec<Breakpoint>>,
    #[serde(default)]
    pub rounding: BTreeMap<String, Rounding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concentration_truncation: Option<BTreeMap<String, f64>>,
    /// The topmost segment accepts any concentration above its `conc_low`.
    #[serde(default)]
    pub extrapolate_upper: bool,
}

impl StandardPack {
    /// Parse and validate a pack document. Segments are sorted by
    /// ascending `conc_low`.
    pub fn from_json_str(text: &str) -> Result<Self, PackError> {
        let mut pack: StandardPack = serde_json::from_str(text)?;
        pack.validate()?;
        for segments in pack.breakpoints.values_mut() {
            segments.sort_by(|a, b| a.conc_low.total_cmp(&b.conc_low));
        }
        Ok(pack)
    }

    fn validate(&self) -> Result<(), PackError> {
        let invalid = |reason: String| PackError::Invalid {
            pack: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".into()));
        }
        if self.breakpoints.is_empty() {
            return Err(invalid("no breakpoints defined".into()));
        }
        for (pollutant, segments) in &self.breakpoints {
            if segments.is_empty() {
                return Err(invalid(format!("pollutant '{pollutant}' has no segments")));
            }
            for (i, seg) in segments.iter().enumerate() {
                let finite = [seg.conc_low, seg.conc_high, seg.index_low, seg.index_high]
                    .iter()
                    .all(|v| v.is_finite());
                if !finite {
                    return Err(invalid(format!("{pollutant} segment {i} is not finite")));
                }
                if seg.conc_high <= seg.conc_low {
                    return Err(invalid(format!(
                        "{pollutant} segment {i}: conc_high {} must exceed conc_low {}",
                        seg.conc_high, seg.conc_low
                    )));
                }
                if seg.index_low < 0.0 || seg.index_high < seg.index_low {
                    return Err(invalid(format!(
                        "{pollutant} segment {i}: index range {}..{} is invalid",
                        seg.index_low, seg.index_high
                    )));
                }
            }
        }
        for cat in self.categories.iter().flatten() {
            if cat.name.trim().is_empty() || !(cat.low <= cat.high) {
                return Err(invalid(format!(
                    "category '{}' has an invalid range {}..{}",
                    cat.name, cat.low, cat.high
                )));
            }
        }
        for (pollutant, step) in self.concentration_truncation.iter().flatten() {
            if !step.is_finite() {
                return Err(invalid(format!("truncation step for {pollutant} is not finite")));
            }
        }
        Ok(())
    }

    /// Segments for a pollutant, looked up through its key aliases.
    pub fn segments(&self, pollutant: Pollutant) -> Option<&[Breakpoint]> {
        pollutant
            .keys()
            .iter()
            .find_map(|k| self.breakpoints.get(*k))
            .map(Vec::as_slice)
    }

    /// Rounding mode for a pollutant; `round` when unspecified.
    pub fn rounding_for(&self, pollutant: Pollutant) -> Rounding {
        pollutant
            .keys()
            .iter()
            .find_map(|k| self.rounding.get(*k).copied())
            .unwrap_or_default()
    }

    /// Positive truncation step for a pollutant, if configured.
    pub fn truncation_for(&self, pollutant: Pollutant) -> Option<f64> {
        let map = self.concentration_truncation.as_ref()?;
        pollutant
            .keys()
            .iter()
            .find_map(|k| map.get(*k).copied())
            .filter(|step| *step > 0.0)
    }

    /// Highest index any segment can produce.
    pub fn max_index(&self) -> f64 {
        self.breakpoints
            .values()
            .flatten()
            .map(|b| b.index_high)
            .fold(0.0, f64::max)
    }
}

/// Load a pack by built-in id.
pub fn builtin_pack(id: &str) -> Result<StandardPack, PackError> {
    let (_, text) = BUILTIN_PACKS
        .iter()
        .find(|(name, _)| *name == id)
        .ok_or_else(|| PackError::UnknownBuiltin(id.to_string()))?;
    StandardPack::from_json_str(text)
}

/// Load a pack document from disk.
pub fn load_standard_pack(path: &Path) -> anyhow::Result<StandardPack> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read standard pack {}", path.display()))?;
    let pack = StandardPack::from_json_str(&text)
        .with_context(|| format!("Failed to load standard pack {}", path.display()))?;
    log::info!("Loaded standard pack '{}' from {}", pack.name, path.display());
    Ok(pack)
}

/// A built-in id, or else a path to a pack document.
pub fn resolve_pack(id_or_path: &str) -> anyhow::Result<StandardPack> {
    if BUILTIN_PACKS.iter().any(|(id, _)| *id == id_or_path) {
        return Ok(builtin_pack(id_or_path)?);
    }
    load_standard_pack(Path::new(id_or_path))
}

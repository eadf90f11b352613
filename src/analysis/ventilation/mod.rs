//! Ventilation (air changes per hour) from exponential concentration decay.
//!
//! ```text
//!   Series ──► resolve_baseline ──► fit_co2_decay / fit_particle_decay ──► DecayFitResult
//!      │
//!      └─────► detect_co2_decay_events ──► Vec<DecayEvent> ──► summarize_ach
//! ```
//!
//! Fits never fail on poor data: a degenerate fit comes back as a zero rate
//! with a warning attached.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::model::{Series, Timestamp};
use crate::error::AnalysisError;

pub mod events;
pub mod fit;
pub mod summary;

pub use events::{DetectionConfig, detect_co2_decay_events};
pub use fit::{fit_co2_decay, fit_particle_decay};
pub use summary::{AchSummary, summarize_ach};

/// Reference outdoor CO2 concentration (ppm).
pub const OUTDOOR_CO2_PPM: f64 = 430.0;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one decay fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecayFitResult {
    pub k_per_hr: f64,
    /// Same as `k_per_hr` for a well-mixed exponential model.
    pub ach: f64,
    pub baseline: f64,
    pub r2: f64,
    /// 95 % confidence interval of `k_per_hr`.
    pub ci: Option<(f64, f64)>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub residuals: Vec<(Timestamp, f64)>,
}

impl DecayFitResult {
    /// Zero-rate result carrying one warning.
    pub fn degenerate(baseline: f64, warning: impl Into<String>) -> Self {
        let warning = warning.into();
        log::debug!("degenerate decay fit: {warning}");
        Self {
            k_per_hr: 0.0,
            ach: 0.0,
            baseline,
            r2: 0.0,
            ci: None,
            warnings: vec![warning],
            residuals: Vec::new(),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.k_per_hr == 0.0 && self.residuals.is_empty() && !self.warnings.is_empty()
    }
}

/// One automatically detected CO2 decay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecayEvent {
    /// `E1`, `E2`, ... in time order.
    pub label: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub peak_time: Timestamp,
    /// Concentration at the peak (not the excess).
    pub peak_value: f64,
    pub baseline: f64,
    /// Method actually used, after any fallback.
    pub method: Co2FitMethod,
    pub ach: f64,
    pub r2: f64,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Co2FitMethod {
    /// Least squares on `ln(C - baseline)`.
    #[default]
    #[serde(rename = "regression")]
    Regression,
    /// First and last point above baseline.
    #[serde(rename = "two_point")]
    TwoPoint,
    /// Time for the excess to fall to 1/e of its peak.
    #[serde(rename = "time_constant_63")]
    TimeConstant63,
}

impl fmt::Display for Co2FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Co2FitMethod::Regression => "regression",
            Co2FitMethod::TwoPoint => "two_point",
            Co2FitMethod::TimeConstant63 => "time_constant_63",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Co2FitMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "regression" => Ok(Co2FitMethod::Regression),
            "two_point" => Ok(Co2FitMethod::TwoPoint),
            "time_constant_63" | "tau63" => Ok(Co2FitMethod::TimeConstant63),
            other => Err(AnalysisError::UnknownChoice {
                what: "CO2 fit method",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleFitMethod {
    /// Least squares on `baseline + A·exp(-k·t)` directly.
    #[default]
    Nonlinear,
    LogLinear,
}

impl FromStr for ParticleFitMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "nonlinear" => Ok(ParticleFitMethod::Nonlinear),
            "log_linear" => Ok(ParticleFitMethod::LogLinear),
            other => Err(AnalysisError::UnknownChoice {
                what: "particle fit method",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum BaselineMode {
    Manual(f64),
    /// [`OUTDOOR_CO2_PPM`].
    Outdoor,
    /// p-th percentile (0..=100) of the analysed series.
    Percentile(f64),
}

impl Default for BaselineMode {
    fn default() -> Self {
        BaselineMode::Manual(OUTDOOR_CO2_PPM)
    }
}

/// Baseline concentration for a series. A percentile of an empty series
/// falls back to `fallback`.
pub fn resolve_baseline(mode: BaselineMode, series: &Series, fallback: f64) -> f64 {
    match mode {
        BaselineMode::Manual(value) => value,
        BaselineMode::Outdoor => OUTDOOR_CO2_PPM,
        BaselineMode::Percentile(p) => {
            let mut values: Vec<f64> = series.valid_values().filter(|v| v.is_finite()).collect();
            values.sort_by(f64::total_cmp);
            percentile(&values, p).unwrap_or(fallback)
        }
    }
}

/// Linear-interpolated percentile of sorted values.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p.clamp(0.0, 100.0) / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_modes() {
        let s = Series::positional("co2", vec![Some(500.0), None, Some(400.0), Some(600.0), Some(450.0)]);
        assert_eq!(resolve_baseline(BaselineMode::Manual(415.0), &s, 0.0), 415.0);
        assert_eq!(resolve_baseline(BaselineMode::Outdoor, &s, 0.0), 430.0);
        // sorted 400 450 500 600, p50 rank 1.5
        assert_eq!(resolve_baseline(BaselineMode::Percentile(50.0), &s, 0.0), 475.0);
        assert_eq!(resolve_baseline(BaselineMode::Percentile(0.0), &s, 0.0), 400.0);
        assert_eq!(resolve_baseline(BaselineMode::Percentile(100.0), &s, 0.0), 600.0);

        let empty = Series::positional("co2", vec![None]);
        assert_eq!(resolve_baseline(BaselineMode::Percentile(5.0), &empty, 420.0), 420.0);
    }

    #[test]
    fn method_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Co2FitMethod::TimeConstant63).unwrap();
        assert_eq!(json, "\"time_constant_63\"");
        assert_eq!("two_point".parse::<Co2FitMethod>().unwrap(), Co2FitMethod::TwoPoint);
        assert_eq!(Co2FitMethod::TimeConstant63.to_string(), "time_constant_63");
        assert!("spline".parse::<ParticleFitMethod>().is_err());
    }
}

use super::aliases::{FLAGS, TIMESTAMP};
use super::model::{Series, Table};
use crate::analysis::smoothing::{WindowSpec, exponential_smoothing, moving_average, parse_time_constant};
use crate::config::FilterConfig;
use crate::error::AnalysisError;

// ---------------------------------------------------------------------------
// Filtered view: smoothing applied to a copy of the analysis table
// ---------------------------------------------------------------------------

/// Parsed form of a [`FilterConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPlan {
    pub window: Option<WindowSpec>,
    pub tau_seconds: Option<f64>,
}

impl FilterPlan {
    /// Validate the window and time-constant strings.
    pub fn from_config(cfg: &FilterConfig) -> Result<Self, AnalysisError> {
        let window = match cfg.sma_window.as_deref() {
            Some(text) => WindowSpec::parse(text)?,
            None => None,
        };
        let tau_seconds = match cfg.ema_tau.as_deref() {
            Some(text) => parse_time_constant(text)?,
            None => None,
        };
        Ok(Self { window, tau_seconds })
    }

    pub fn is_identity(&self) -> bool {
        self.window.is_none() && !self.tau_seconds.is_some_and(|t| t > 0.0)
    }
}

/// Moving average, then exponential smoothing, on every data column.
///
/// The bitfield `flags` column is copied unchanged. The input is never
/// modified.
pub fn filtered_view(table: &Table, cfg: &FilterConfig) -> Result<Table, AnalysisError> {
    let plan = FilterPlan::from_config(cfg)?;
    let mut out = Table::new(table.timestamps.clone());
    for column in &table.columns {
        if column.name == FLAGS || column.name == TIMESTAMP || plan.is_identity() {
            out.push_column(column.name.clone(), column.values.clone());
            continue;
        }
        let mut series = Series::with_times(&column.name, table.timestamps.clone(), column.values.clone());
        if let Some(window) = plan.window {
            series = moving_average(&series, window)?;
        }
        if let Some(tau) = plan.tau_seconds {
            series = exponential_smoothing(&series, tau, cfg.ema_nan_mode);
        }
        out.push_column(column.name.clone(), series.values);
    }
    log::debug!(
        "filtered view: window {:?}, tau {:?} s, {} columns",
        plan.window,
        plan.tau_seconds,
        out.columns.len()
    );
    Ok(out)
}

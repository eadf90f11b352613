mod app;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueHint};

#[derive(Parser, Debug)]
#[command(author, version, about = "Indoor air-quality sensor log analyzer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a log and report its columns, gaps and data-quality diagnostics
    Inspect(InspectArgs),
    /// Compute the air quality index from PM2.5 / PM10
    Aqi(AqiArgs),
    /// Time-weighted exposure of one metric against a threshold
    Exposure(ExposureArgs),
    /// Fit one decay segment and report the air change rate
    Decay(DecayArgs),
    /// Detect CO2 decay events and summarise their air change rates
    Events(EventsArgs),
    /// Write the clean, filtered or resampled table as CSV or Parquet
    Export(ExportArgs),
}

/// Where the data comes from and which part of it is analysed.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Sensor log (.csv / .txt); defaults to the active dataset of --project
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Project JSON supplying datasets and settings
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub project: Option<PathBuf>,

    /// Resample to this interval (e.g. 5min) and analyse the resampled table
    #[arg(long)]
    pub resample: Option<String>,

    /// Start of the analysed window (RFC 3339, inclusive)
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// End of the analysed window (RFC 3339, inclusive)
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Print the first N rows of the analysis table
    #[arg(long, default_value_t = 0)]
    pub rows: usize,
}

#[derive(Args, Debug)]
pub struct AqiArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Built-in pack id (e.g. us_epa_2024) or path to a pack JSON
    #[arg(long)]
    pub pack: Option<String>,

    /// instant, rolling_24h or daily
    #[arg(long, default_value = "instant")]
    pub averaging: String,

    /// Write the AQI table to this CSV
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExposureArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(long, default_value = "pm2_5")]
    pub column: String,

    #[arg(long)]
    pub threshold: f64,

    /// daily, weekly or monthly summary
    #[arg(long)]
    pub period: Option<String>,

    /// Write the periodic summary to this CSV
    #[arg(short, long, requires = "period", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

/// Baseline concentration the decay is measured against.
#[derive(Args, Debug)]
pub struct BaselineArgs {
    /// manual, outdoor or percentile
    #[arg(long, default_value = "manual")]
    pub baseline_mode: String,

    /// Manual baseline; defaults to 430 ppm for CO2 and 0 for particles
    #[arg(long)]
    pub baseline: Option<f64>,

    /// Percentile used by --baseline-mode percentile
    #[arg(long, default_value_t = 5.0)]
    pub percentile: f64,
}

#[derive(Args, Debug)]
pub struct DecayArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub baseline: BaselineArgs,

    #[arg(long, default_value = "co2")]
    pub column: String,

    /// CO2: regression, two_point, time_constant_63. Particles: nonlinear, log_linear
    #[arg(long)]
    pub method: Option<String>,

    /// Write the fit summary to this JSON
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub baseline: BaselineArgs,

    /// Minimum peak-to-trough drop in excess CO2 (ppm)
    #[arg(long, default_value_t = 100.0)]
    pub min_drop: f64,

    #[arg(long, default_value_t = 10.0)]
    pub min_minutes: f64,

    #[arg(long, default_value_t = 4)]
    pub min_points: usize,

    #[arg(long, default_value_t = 5.0)]
    pub min_gap_minutes: f64,

    #[arg(long, default_value = "time_constant_63")]
    pub method: String,

    /// Events below this R² are left out of the ACH summary
    #[arg(long, default_value_t = 0.9)]
    pub min_r2: f64,

    /// Write the events to this CSV
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// clean, filtered or resampled
    #[arg(long, default_value = "clean")]
    pub view: String,

    /// Moving average window for the filtered view (10 or 30min)
    #[arg(long)]
    pub sma: Option<String>,

    /// Exponential smoothing time constant for the filtered view (60 or 15min)
    #[arg(long)]
    pub ema: Option<String>,

    /// skip, reset or hold
    #[arg(long)]
    pub ema_gap_mode: Option<String>,

    /// Destination; `.parquet` writes Parquet, anything else CSV
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    app::run(Cli::parse())
}

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------
//
// Fatal input problems get a typed error. "Not enough good data" conditions in
// the analysis layer are NOT errors: those functions return result structs
// carrying `warnings` instead.

/// Failure to parse a duration string such as `30min` or `1h30min`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("unknown duration unit '{unit}' in '{input}'")]
    UnknownUnit { input: String, unit: String },
}

/// Fatal errors raised at the importer boundary.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV missing timestamp column")]
    MissingTimestampColumn,
    #[error("timestamp column is not numeric")]
    NonNumericTimestamp,
    #[error("input has no header row")]
    EmptyInput,
    #[error("invalid resample interval '{interval}': {source}")]
    InvalidResampleInterval {
        interval: String,
        #[source]
        source: DurationError,
    },
    #[error("unsupported file extension: .{0}")]
    UnsupportedExtension(String),
}

/// Fatal errors raised by the analysis layer (bad request, not bad data).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0} requires a time-indexed series")]
    NotTimeIndexed(&'static str),
    #[error(
        "invalid moving average window '{0}': use samples (e.g. 10) or a time like 30min"
    )]
    InvalidWindow(String),
    #[error(
        "invalid exponential smoothing time '{0}': use seconds (e.g. 60) or a time like 15min"
    )]
    InvalidTimeConstant(String),
    #[error("invalid exposure period '{0}': use daily, weekly or monthly")]
    InvalidPeriod(String),
    #[error("unknown {what} '{value}'")]
    UnknownChoice { what: &'static str, value: String },
    #[error("invalid {what} {value}: expected a non-negative number")]
    InvalidThreshold { what: &'static str, value: f64 },
}

/// Errors loading or validating an AQI standard pack.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("malformed standard pack: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("standard pack '{pack}' is invalid: {reason}")]
    Invalid { pack: String, reason: String },
    #[error("unknown built-in standard pack '{0}'")]
    UnknownBuiltin(String),
}

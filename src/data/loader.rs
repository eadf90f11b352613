use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::DateTime;

use super::aliases::{TIMESTAMP, normalize_columns};
use super::gaps::median;
use super::model::{Dataset, Table, Timestamp};
use super::process::Provenance;
use crate::config::{DedupKeep, ProcessingConfig};
use crate::error::ImportError;

/// Epoch values above this are milliseconds, below are seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Import a sensor log. Dispatch by extension.
///
/// Supported formats:
/// * `.csv` / `.txt` – delimited text with a header row (comma or semicolon)
pub fn load_file(path: &Path, config: &ProcessingConfig) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" | "txt" => load_csv(path, config),
        other => Err(ImportError::UnsupportedExtension(other.to_string()).into()),
    }
}

/// Import a delimited-text sensor log from disk.
pub fn load_csv(path: &Path, config: &ProcessingConfig) -> Result<Dataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading CSV file {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string();

    let mut dataset = import_csv_str(&name, &text, config)
        .with_context(|| format!("importing {}", path.display()))?;
    dataset.metadata.path = Some(path.to_path_buf());
    Ok(dataset)
}

/// Import a sensor log held in memory.
///
/// Steps: delimiter → header normalization → numeric coercion → timestamp
/// conversion → sort/dedup → masks, resampling, gaps, flatlines.
pub fn import_csv_str(name: &str, text: &str, config: &ProcessingConfig) -> Result<Dataset> {
    let delimiter = config.delimiter.unwrap_or_else(|| detect_delimiter(text));
    if !delimiter.is_ascii() {
        bail!("delimiter '{delimiter}' is not a single-byte character");
    }
    log::debug!("{name}: using delimiter {delimiter:?}");

    let parsed = parse_csv(text, delimiter as u8)?;
    let (raw, dropped_rows, duplicate_rows) = build_raw_table(parsed, config.dedup_keep)?;

    log::info!(
        "{name}: {} rows, {} columns ({} unparsable timestamps dropped, {} duplicate timestamps removed)",
        raw.len(),
        raw.columns.len(),
        dropped_rows,
        duplicate_rows
    );

    let provenance = Provenance {
        path: None,
        delimiter,
        dropped_rows,
        duplicate_rows,
    };
    let dataset = Dataset::from_raw(name, raw, config.clone(), provenance)?;
    log::info!("{name}: {} gaps detected", dataset.metadata.gaps.len());
    Ok(dataset)
}

/// Comma unless the header line holds more semicolons than commas.
pub fn detect_delimiter(text: &str) -> char {
    let first_line = text.lines().next().unwrap_or("");
    let comma = first_line.matches(',').count();
    let semicolon = first_line.matches(';').count();
    if comma >= semicolon { ',' } else { ';' }
}

// ---------------------------------------------------------------------------
// CSV parsing
// ---------------------------------------------------------------------------

/// Column-oriented view of the CSV after header normalization and numeric
/// coercion. Unparsable cells are already `None`.
struct ParsedCsv {
    timestamps: Vec<Option<f64>>,
    columns: Vec<(String, Vec<Option<f64>>)>,
}

fn parse_csv(text: &str, delimiter: u8) -> Result<ParsedCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(ImportError::EmptyInput.into());
    }

    // original header → canonical key
    let renamed: Vec<String> = {
        let normalized = normalize_columns(&headers);
        headers
            .iter()
            .map(|h| {
                normalized
                    .iter()
                    .find(|(_, original)| *original == h)
                    .map(|(canonical, _)| canonical.clone())
                    .unwrap_or_else(|| h.clone())
            })
            .collect()
    };

    let ts_idx = renamed
        .iter()
        .position(|h| h == TIMESTAMP)
        .ok_or(ImportError::MissingTimestampColumn)?;

    let mut timestamps = Vec::new();
    let mut columns: Vec<(String, Vec<Option<f64>>)> = renamed
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(_, h)| (h.clone(), Vec::new()))
        .collect();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        timestamps.push(parse_number(record.get(ts_idx).unwrap_or("")));

        let mut col = 0;
        for idx in 0..renamed.len() {
            if idx == ts_idx {
                continue;
            }
            columns[col].1.push(parse_number(record.get(idx).unwrap_or("")));
            col += 1;
        }
    }

    Ok(ParsedCsv {
        timestamps,
        columns,
    })
}

/// Lenient float parsing: anything unparsable (or NaN) is missing.
fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

// ---------------------------------------------------------------------------
// Timestamp conversion, sort and de-duplication
// ---------------------------------------------------------------------------

/// Convert epoch numbers to UTC timestamps, detecting seconds vs
/// milliseconds from the median magnitude.
fn convert_timestamps(epochs: &[Option<f64>]) -> Result<Vec<Option<Timestamp>>, ImportError> {
    let valid: Vec<f64> = epochs.iter().filter_map(|v| *v).collect();
    let Some(median) = median(&valid) else {
        return Err(ImportError::NonNumericTimestamp);
    };
    let millis_per_unit = if median > MILLIS_THRESHOLD { 1.0 } else { 1000.0 };
    log::debug!(
        "timestamp unit detected as {}",
        if millis_per_unit == 1.0 { "milliseconds" } else { "seconds" }
    );

    Ok(epochs
        .iter()
        .map(|v| v.and_then(|v| DateTime::from_timestamp_millis((v * millis_per_unit).round() as i64)))
        .collect())
}

/// Returns the raw table plus the number of rows dropped for a bad
/// timestamp and for duplicate timestamps.
fn build_raw_table(parsed: ParsedCsv, keep: DedupKeep) -> Result<(Table, usize, usize), ImportError> {
    let times = convert_timestamps(&parsed.timestamps)?;

    let mut order: Vec<(usize, Timestamp)> = times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.map(|t| (i, t)))
        .collect();
    let dropped = times.len() - order.len();

    // Stable: equal timestamps keep file order.
    order.sort_by_key(|(_, t)| *t);

    let mut rows: Vec<usize> = Vec::with_capacity(order.len());
    let mut stamps: Vec<Timestamp> = Vec::with_capacity(order.len());
    for (idx, t) in order {
        if stamps.last() == Some(&t) {
            if keep == DedupKeep::Last {
                if let Some(last) = rows.last_mut() {
                    *last = idx;
                }
            }
            continue;
        }
        rows.push(idx);
        stamps.push(t);
    }
    let duplicates = times.len() - dropped - rows.len();

    let mut table = Table::new(stamps);
    for (name, values) in parsed.columns {
        table.push_column(name, rows.iter().map(|&i| values[i]).collect());
    }
    Ok((table, dropped, duplicates))
}

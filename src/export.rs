use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::SecondsFormat;
use parquet::arrow::ArrowWriter;

use crate::analysis::aqi::AqiTable;
use crate::analysis::exposure::PeriodSummary;
use crate::analysis::ventilation::{DecayEvent, DecayFitResult};
use crate::data::aliases::TIMESTAMP;
use crate::data::model::{SeriesIndex, Table, Timestamp};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn fmt_time(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn fmt_value(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Write a table as delimited text: RFC 3339 timestamps, empty cells for
/// missing values.
pub fn write_table_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![TIMESTAMP.to_string()];
    header.extend(table.columns.iter().map(|c| c.name.clone()));
    writer.write_record(&header)?;

    for (row, t) in table.timestamps.iter().enumerate() {
        let mut record = Vec::with_capacity(table.columns.len() + 1);
        record.push(fmt_time(t));
        record.extend(table.columns.iter().map(|c| fmt_value(c.values[row])));
        writer.write_record(&record)?;
    }
    writer.flush().context("Failed to flush CSV writer")?;
    log::info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Arrow view of a table: a UTC millisecond timestamp column followed by
/// nullable `Float64` columns.
pub fn table_to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = vec![Field::new(
        TIMESTAMP,
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
        false,
    )];
    let millis: Vec<i64> = table.timestamps.iter().map(|t| t.timestamp_millis()).collect();
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(TimestampMillisecondArray::from(millis).with_timezone("UTC"))];

    for column in &table.columns {
        fields.push(Field::new(&column.name, DataType::Float64, true));
        arrays.push(Arc::new(Float64Array::from(column.values.clone())));
    }

    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, arrays).context("Failed to build record batch")
}

/// Write a table as Parquet.
pub fn write_table_parquet(table: &Table, path: &Path) -> Result<()> {
    let batch = table_to_record_batch(table)?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet record batch")?;
    writer.close().context("closing parquet writer")?;
    log::info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Render the first `max_rows` rows as a text grid.
pub fn pretty_table(table: &Table, max_rows: usize) -> Result<String> {
    let batch = table_to_record_batch(table)?;
    let head = batch.slice(0, max_rows.min(batch.num_rows()));
    let rendered = arrow::util::pretty::pretty_format_batches(&[head]).context("formatting table")?;
    Ok(rendered.to_string())
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// `timestamp, aqi_pm25, aqi_pm10, aqi_overall, aqi_category`; sub-index
/// and category columns only when computed. A positional table writes the
/// row number in place of the timestamp.
pub fn write_aqi_csv(aqi: &AqiTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![TIMESTAMP];
    if aqi.pm25.is_some() {
        header.push("aqi_pm25");
    }
    if aqi.pm10.is_some() {
        header.push("aqi_pm10");
    }
    header.push("aqi_overall");
    if aqi.category.is_some() {
        header.push("aqi_category");
    }
    writer.write_record(&header)?;

    for row in 0..aqi.len() {
        let mut record = Vec::with_capacity(header.len());
        record.push(match &aqi.index {
            SeriesIndex::Time(times) => fmt_time(&times[row]),
            SeriesIndex::Position => row.to_string(),
        });
        if let Some(v) = &aqi.pm25 {
            record.push(fmt_value(v[row]));
        }
        if let Some(v) = &aqi.pm10 {
            record.push(fmt_value(v[row]));
        }
        record.push(fmt_value(aqi.overall[row]));
        if let Some(c) = &aqi.category {
            record.push(c[row].clone().unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush().context("Failed to flush CSV writer")?;
    log::info!("Wrote {} AQI rows to {}", aqi.len(), path.display());
    Ok(())
}

/// Single-fit summary as pretty JSON (rate, ACH, baseline, R², CI, warnings).
pub fn write_ventilation_json(result: &DecayFitResult, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, result).context("Failed to serialise ventilation result")?;
    log::info!("Wrote ventilation result to {}", path.display());
    Ok(())
}

const PERIOD_HEADER: [&str; 10] = [
    "start",
    "end",
    "auc",
    "exceedance_auc",
    "time_above_seconds",
    "mean",
    "mean_excess",
    "time_above_pct",
    "relative_to_threshold",
    "total_seconds",
];

/// Exposure periodic summary, one row per bucket.
pub fn write_periods_csv(rows: &[PeriodSummary], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(PERIOD_HEADER)?;
    for row in rows {
        let s = &row.stats;
        writer.write_record([
            fmt_time(&row.start),
            fmt_time(&row.end),
            s.auc.to_string(),
            s.exceedance_auc.to_string(),
            s.time_above_seconds.to_string(),
            fmt_value(s.mean),
            fmt_value(s.mean_excess),
            fmt_value(s.time_above_pct),
            fmt_value(s.relative_to_threshold),
            s.total_seconds.to_string(),
        ])?;
    }
    writer.flush().context("Failed to flush CSV writer")?;
    log::info!("Wrote {} exposure periods to {}", rows.len(), path.display());
    Ok(())
}

/// Detected decay events; warnings are joined with `"; "`.
pub fn write_events_csv(events: &[DecayEvent], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([
        "label", "start", "end", "peak_time", "peak_value", "baseline", "method", "ach", "r2", "warnings",
    ])?;
    for e in events {
        writer.write_record([
            e.label.clone(),
            fmt_time(&e.start),
            fmt_time(&e.end),
            fmt_time(&e.peak_time),
            e.peak_value.to_string(),
            e.baseline.to_string(),
            e.method.to_string(),
            e.ach.to_string(),
            e.r2.to_string(),
            e.warnings.join("; "),
        ])?;
    }
    writer.flush().context("Failed to flush CSV writer")?;
    log::info!("Wrote {} decay events to {}", events.len(), path.display());
    Ok(())
}

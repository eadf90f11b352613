use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};

use airlog::analysis::aqi::{Averaging, aqi_summary, apply_averaging, compute_aqi};
use airlog::analysis::exposure::{Period, exposure_stats, summarize_periods};
use airlog::analysis::standards::resolve_pack;
use airlog::analysis::ventilation::{
    BaselineMode, Co2FitMethod, DetectionConfig, OUTDOOR_CO2_PPM, ParticleFitMethod, detect_co2_decay_events,
    fit_co2_decay, fit_particle_decay, resolve_baseline, summarize_ach,
};
use airlog::color::category_colors;
use airlog::config::{GapMode, ProcessingConfig};
use airlog::data::aliases::{ColumnClass, metric_label};
use airlog::data::filter::filtered_view;
use airlog::data::model::{Series, Table};
use airlog::error::AnalysisError;
use airlog::export::{
    pretty_table, write_aqi_csv, write_events_csv, write_periods_csv, write_table_csv, write_table_parquet,
    write_ventilation_json,
};
use airlog::project::load_project;
use airlog::state::Session;

use crate::{
    AqiArgs, BaselineArgs, Cli, Command, DecayArgs, EventsArgs, ExportArgs, ExposureArgs, InputArgs, InspectArgs,
};

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Inspect(args) => inspect(&args),
        Command::Aqi(args) => aqi(&args),
        Command::Exposure(args) => exposure(&args),
        Command::Decay(args) => decay(&args),
        Command::Events(args) => events(&args),
        Command::Export(args) => export(&args),
    }
}

// ---- Input resolution ----

/// Session holding the requested dataset as the active one.
fn open(input: &InputArgs) -> Result<Session> {
    let mut session = match &input.project {
        Some(path) => Session::from_project(&load_project(path)?)?,
        None => Session::default(),
    };
    if let Some(interval) = &input.resample {
        let config = ProcessingConfig {
            resample_interval: Some(interval.clone()),
            use_resampled: true,
            ..session.processing_config.clone()
        };
        session.reprocess_all(config)?;
    }
    if let Some(file) = &input.file {
        session.add_file(file)?;
    }
    if session.active_dataset().is_none() {
        bail!("no input: pass a sensor log or a --project listing one");
    }
    Ok(session)
}

/// Analysis table of the active dataset, restricted to `--from/--to`.
fn selected_table(session: &Session, input: &InputArgs) -> Result<Table> {
    let dataset = session.active_dataset().context("no active dataset")?;
    Ok(restrict(dataset.analysis_table().clone(), input))
}

fn restrict(table: Table, input: &InputArgs) -> Table {
    match (input.from, input.to) {
        (None, None) => table,
        (from, to) => table.between(
            from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            to.unwrap_or(DateTime::<Utc>::MAX_UTC),
        ),
    }
}

fn series(table: &Table, column: &str) -> Result<Series> {
    table.series(column).ok_or_else(|| {
        anyhow!(
            "column '{column}' not present (available: {})",
            table.column_names().join(", ")
        )
    })
}

fn label(column: &str) -> &str {
    metric_label(column).unwrap_or(column)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn inspect(args: &InspectArgs) -> Result<()> {
    let session = open(&args.input)?;
    let dataset = session.active_dataset().context("no active dataset")?;
    let meta = &dataset.metadata;

    println!("{}: {} rows, delimiter {:?}", dataset.name, dataset.len(), meta.delimiter);
    if meta.dropped_rows > 0 || meta.duplicate_rows > 0 {
        println!(
            "  {} rows without a numeric timestamp, {} duplicate timestamps removed",
            meta.dropped_rows, meta.duplicate_rows
        );
    }
    if let Some(rows) = meta.resampled_rows {
        println!(
            "  resampled to {} rows ({})",
            rows,
            meta.resample_interval.as_deref().unwrap_or("?")
        );
    }

    println!("Columns:");
    for name in &meta.columns {
        let Some(column) = dataset.clean.column(name) else {
            continue;
        };
        println!("  {:<16} {:>8} valid of {}", label(name), column.count_valid(), dataset.len());
        if let Some(reasons) = meta.mask_reasons.get(name) {
            for (reason, count) in reasons.iter().filter(|(_, n)| **n > 0) {
                println!("      {reason}: {count}");
            }
        }
    }

    println!("Gaps: {}", meta.gaps.len());
    for gap in meta.gaps.iter().take(10) {
        println!("  {} -> {}", gap.start, gap.end);
    }

    let flagged: Vec<_> = dataset
        .flags
        .keys()
        .map(|k| (k, dataset.flagged_count(k)))
        .filter(|(_, n)| *n > 0)
        .collect();
    if !flagged.is_empty() {
        println!("Flatline diagnostics:");
        for (name, count) in flagged {
            println!("  {name}: {count} rows");
        }
    }

    if args.rows > 0 {
        let table = selected_table(&session, &args.input)?;
        println!("{}", pretty_table(&table, args.rows)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// aqi
// ---------------------------------------------------------------------------

fn aqi(args: &AqiArgs) -> Result<()> {
    let session = open(&args.input)?;
    let pack = match &args.pack {
        Some(id) => resolve_pack(id)?,
        None => session.standard_pack()?,
    };
    let averaging: Averaging = args.averaging.parse()?;
    let table = selected_table(&session, &args.input)?;

    let averaged = |column: &str| -> Result<Option<Series>> {
        table
            .series(column)
            .map(|s| apply_averaging(&s, averaging))
            .transpose()
            .map_err(Into::into)
    };
    let pm25 = averaged("pm2_5")?;
    let pm10 = averaged("pm10")?;
    if pm25.is_none() && pm10.is_none() {
        bail!("dataset has neither PM2.5 nor PM10");
    }

    let aqi = compute_aqi(pm25.as_ref(), pm10.as_ref(), &pack)?;
    let summary = aqi_summary(&aqi.overall_series(), pack.categories.as_deref())?;

    println!("{} ({averaging:?} averaging), {} rows", pack.name, aqi.len());
    println!("  max  {}", fmt_opt(summary.max));
    println!("  mean {}", fmt_opt(summary.mean));
    if let (Some(categories), Some(times)) = (&pack.categories, &summary.time_in_category) {
        let colors = category_colors(categories);
        for ((category, time), color) in categories.iter().zip(times).zip(colors) {
            println!("  {color} {:<32} {:>10.1} h", category.name, time.seconds / 3600.0);
        }
    }

    if let Some(path) = &args.output {
        write_aqi_csv(&aqi, path)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// exposure
// ---------------------------------------------------------------------------

fn exposure(args: &ExposureArgs) -> Result<()> {
    let session = open(&args.input)?;
    let table = selected_table(&session, &args.input)?;
    let series = series(&table, &args.column)?;

    let stats = exposure_stats(&series, args.threshold)?;
    println!("{} against {}", label(&args.column), args.threshold);
    println!("  AUC            {:.2} (unit·h)", stats.auc);
    println!("  exceedance AUC {:.2} (unit·h)", stats.exceedance_auc);
    println!("  time above     {:.1} h of {:.1} h", stats.time_above_seconds / 3600.0, stats.total_seconds / 3600.0);
    println!("  mean           {}", fmt_opt(stats.mean));
    println!("  mean excess    {}", fmt_opt(stats.mean_excess));

    if let Some(period) = &args.period {
        let period: Period = period.parse()?;
        let rows = summarize_periods(&series, args.threshold, period)?;
        for row in &rows {
            println!(
                "  {}  AUC {:>10.2}  above {:>6.1} h",
                row.start.date_naive(),
                row.stats.auc,
                row.stats.time_above_seconds / 3600.0
            );
        }
        if let Some(path) = &args.output {
            write_periods_csv(&rows, path)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// decay / events
// ---------------------------------------------------------------------------

fn baseline_mode(args: &BaselineArgs, default_manual: f64) -> Result<BaselineMode> {
    Ok(match args.baseline_mode.trim() {
        "manual" => BaselineMode::Manual(args.baseline.unwrap_or(default_manual)),
        "outdoor" => BaselineMode::Outdoor,
        "percentile" => BaselineMode::Percentile(args.percentile),
        other => {
            return Err(AnalysisError::UnknownChoice {
                what: "baseline mode",
                value: other.to_string(),
            }
            .into());
        }
    })
}

fn decay(args: &DecayArgs) -> Result<()> {
    let session = open(&args.input)?;
    let table = selected_table(&session, &args.input)?;
    let series = series(&table, &args.column)?;

    let particulate = ColumnClass::of(&args.column).is_particulate();
    let default_baseline = if particulate { 0.0 } else { OUTDOOR_CO2_PPM };
    let baseline = resolve_baseline(baseline_mode(&args.baseline, default_baseline)?, &series, default_baseline);

    let result = if particulate {
        let method: ParticleFitMethod = args.method.as_deref().map(str::parse::<ParticleFitMethod>).transpose()?.unwrap_or_default();
        fit_particle_decay(&series, baseline, method)?
    } else {
        let method: Co2FitMethod = args.method.as_deref().map(str::parse::<Co2FitMethod>).transpose()?.unwrap_or_default();
        fit_co2_decay(&series, baseline, method)?
    };

    println!("{} decay, baseline {:.1}", label(&args.column), baseline);
    println!("  k   {:.3} /h", result.k_per_hr);
    println!("  ACH {:.3}", result.ach);
    println!("  R²  {:.3}", result.r2);
    if let Some((lo, hi)) = result.ci {
        println!("  95% CI [{lo:.3}, {hi:.3}]");
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }

    if let Some(path) = &args.output {
        write_ventilation_json(&result, path)?;
    }
    Ok(())
}

fn events(args: &EventsArgs) -> Result<()> {
    let session = open(&args.input)?;
    let table = selected_table(&session, &args.input)?;
    let series = series(&table, "co2")?;
    let baseline = resolve_baseline(baseline_mode(&args.baseline, OUTDOOR_CO2_PPM)?, &series, OUTDOOR_CO2_PPM);

    let cfg = DetectionConfig {
        min_drop: args.min_drop,
        min_minutes: args.min_minutes,
        min_points: args.min_points,
        min_gap_minutes: args.min_gap_minutes,
        method: args.method.parse()?,
    };
    let events = detect_co2_decay_events(&series, baseline, &cfg)?;

    println!("{} decay events (baseline {:.1} ppm)", events.len(), baseline);
    for e in &events {
        println!(
            "  {:<4} {} -> {}  peak {:>7.1}  ACH {:>6.3}  R² {:.3}  {}",
            e.label,
            e.start,
            e.end,
            e.peak_value,
            e.ach,
            e.r2,
            e.method
        );
        for warning in &e.warnings {
            println!("       warning: {warning}");
        }
    }
    match summarize_ach(&events, args.min_r2) {
        Some(s) => println!(
            "ACH over {} events with R² >= {}: mean {:.3}, median {:.3}, min {:.3}, max {:.3}, std {:.3}",
            s.n, args.min_r2, s.mean, s.median, s.min, s.max, s.std
        ),
        None => println!("No event reaches R² >= {}", args.min_r2),
    }

    if let Some(path) = &args.output {
        write_events_csv(&events, path)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

fn gap_mode(text: &str) -> Result<GapMode, AnalysisError> {
    match text.trim() {
        "skip" => Ok(GapMode::Skip),
        "reset" => Ok(GapMode::Reset),
        "hold" => Ok(GapMode::Hold),
        other => Err(AnalysisError::UnknownChoice {
            what: "EMA gap mode",
            value: other.to_string(),
        }),
    }
}

fn export(args: &ExportArgs) -> Result<()> {
    let session = open(&args.input)?;
    let dataset = session.active_dataset().context("no active dataset")?;

    let table = match args.view.trim() {
        "clean" => dataset.clean.clone(),
        "resampled" => dataset
            .resampled
            .clone()
            .context("no resampled table: pass --resample or set it in the project")?,
        "filtered" => {
            let mut filter = session.filter_config.clone();
            if args.sma.is_some() {
                filter.sma_window = args.sma.clone();
            }
            if args.ema.is_some() {
                filter.ema_tau = args.ema.clone();
            }
            if let Some(mode) = &args.ema_gap_mode {
                filter.ema_nan_mode = gap_mode(mode)?;
            }
            filtered_view(dataset.analysis_table(), &filter)?
        }
        other => bail!("unknown view '{other}': use clean, filtered or resampled"),
    };
    let table = restrict(table, &args.input);

    let parquet = args
        .output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));
    if parquet {
        write_table_parquet(&table, &args.output)?;
    } else {
        write_table_csv(&table, &args.output)?;
    }
    println!("{} view of {}: {} rows -> {}", args.view, dataset.name, table.len(), args.output.display());
    Ok(())
}

//! # pvrsd-data
//!
//! Command-line front end for PVRSD measurement files.
//!
//! ```bash
//! # Check files and print the problems found
//! pvrsd-data validate run.csv bench.xlsx
//!
//! # Flag outliers in the current column, write the result as parquet
//! pvrsd-data anomalies run.csv --column current --method zscore -o flagged.parquet
//!
//! # Store rows as JSON lines for an experiment
//! pvrsd-data records run.csv --experiment-id 7f0c... -o records.jsonl
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};

use pvrsd_data::AnalysisConfig;
use pvrsd_data::data::export::{export_file, to_json, to_record_batch};
use pvrsd_data::data::records::JsonLinesSink;
use pvrsd_data::data::stats::detect_anomalies_with;
use pvrsd_data::data::validate::{is_known_column, normalize_and_validate_with};
use pvrsd_data::data::{
    AnomalyMethod, FilterMethod, MeasurementTable, RecordSink, compute_statistics, filter_series,
    loader, resample::resample, to_persistence_records,
};

/// Validate, analyse and convert PVRSD test data
#[derive(Parser)]
#[command(name = "pvrsd-data")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML file overriding validation limits and anomaly thresholds
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize columns and report validation problems for each file
    Validate {
        #[arg(value_name = "INPUT", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },

    /// Print descriptive statistics as JSON, keyed by file
    Stats {
        #[arg(value_name = "INPUT", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },

    /// Append an anomaly_flag column
    Anomalies {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(long, default_value = "current")]
        column: String,

        /// iqr or zscore
        #[arg(short, long, default_value = "iqr")]
        method: AnomalyMethod,

        /// Output file (.csv, .json, .parquet); JSON to stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Append a smoothed <column>_filtered column
    Filter {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(long, default_value = "current")]
        column: String,

        /// moving_average, exponential or median
        #[arg(short, long, default_value = "moving_average")]
        method: FilterMethod,

        #[arg(short, long, default_value = "5")]
        window: usize,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Average numeric columns into fixed time buckets
    Resample {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Bucket width in seconds
        #[arg(short, long, default_value = "1")]
        seconds: f64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write persistence records as JSON lines
    Records {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Experiment identifier (random UUID if omitted)
        #[arg(short, long)]
        experiment_id: Option<String>,

        /// JSON-lines output file; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the first rows and per-column counts
    Preview {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short = 'n', long, default_value = "20")]
        rows: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &cli.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Validate { inputs } => {
            let batch = loader::load_files(&inputs);
            let mut all_valid = batch.failed.is_empty();
            let mut reports = Vec::with_capacity(inputs.len());
            for (name, raw) in &batch.loaded {
                let (result, table) = normalize_and_validate_with(raw, &config.limits);
                all_valid &= result.valid;
                reports.push(serde_json::json!({
                    "file": name,
                    "valid": result.valid,
                    "rows": table.len(),
                    "columns": table.column_names(),
                    "errors": result.messages(),
                }));
            }
            for (name, err) in &batch.failed {
                reports.push(serde_json::json!({
                    "file": name,
                    "valid": false,
                    "load_error": format!("{err:#}"),
                }));
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
            if !all_valid {
                std::process::exit(1);
            }
        }

        Commands::Stats { inputs } => {
            let batch = loader::load_files(&inputs);
            if batch.loaded.is_empty() {
                bail!("none of the {} input files could be loaded", inputs.len());
            }
            let mut summaries = serde_json::Map::new();
            for (name, raw) in &batch.loaded {
                let table = validated(name, raw, &config);
                let summary = compute_statistics(&table);
                summaries.insert(name.clone(), serde_json::to_value(&summary)?);
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }

        Commands::Anomalies {
            input,
            column,
            method,
            output,
        } => {
            let table = load_validated(&input, &config)?;
            let flagged = detect_anomalies_with(&table, &column, method, &config.anomaly)?;
            emit_table(&flagged, output.as_deref())?;
        }

        Commands::Filter {
            input,
            column,
            method,
            window,
            output,
        } => {
            let table = load_validated(&input, &config)?;
            let filtered = filter_series(&table, &column, method, window)?;
            emit_table(&filtered, output.as_deref())?;
        }

        Commands::Resample {
            input,
            seconds,
            output,
        } => {
            let table = load_validated(&input, &config)?;
            let interval = chrono::Duration::microseconds((seconds * 1_000_000.0).round() as i64);
            let resampled = resample(&table, interval)?;
            emit_table(&resampled, output.as_deref())?;
        }

        Commands::Records {
            input,
            experiment_id,
            output,
        } => {
            let table = load_validated(&input, &config)?;
            let experiment_id =
                experiment_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let records = to_persistence_records(&table, &experiment_id);
            let written = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    JsonLinesSink::new(BufWriter::new(file)).insert_batch(&records)?
                }
                None => JsonLinesSink::new(io::stdout().lock()).insert_batch(&records)?,
            };
            info!("experiment {experiment_id}: {written} records");
        }

        Commands::Preview { input, rows } => {
            let table = loader::load_file(&input)?;
            preview(&table, rows)?;
        }
    }

    Ok(())
}

/// Load, normalize and validate; problems are logged but do not stop the run.
fn load_validated(input: &Path, config: &AnalysisConfig) -> Result<MeasurementTable> {
    let raw = loader::load_file(input)?;
    Ok(validated(&input.display().to_string(), &raw, config))
}

fn validated(name: &str, raw: &MeasurementTable, config: &AnalysisConfig) -> MeasurementTable {
    let (result, table) = normalize_and_validate_with(raw, &config.limits);
    for msg in result.messages() {
        warn!("{name}: {msg}");
    }
    table
}

fn emit_table(table: &MeasurementTable, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => export_file(table, path),
        None => {
            let mut out = io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &to_json(table))?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn preview(table: &MeasurementTable, max_rows: usize) -> Result<()> {
    let head = MeasurementTable::new(
        table.column_names().to_vec(),
        table.rows().iter().take(max_rows).cloned().collect(),
    );
    let batch = to_record_batch(&head)?;
    println!("Preview ({} of {} rows)", head.len(), table.len());
    println!("{}", arrow::util::pretty::pretty_format_batches(&[batch])?);

    println!("\n{:<24} {:>10} {:>10} {:>10}", "column", "non-null", "unique", "null");
    for name in table.column_names() {
        let cells = table.column(name).unwrap_or_default();
        let nulls = cells.iter().filter(|c| c.is_null()).count();
        let label = if is_known_column(name) {
            name.clone()
        } else {
            format!("{name} (?)")
        };
        println!(
            "{:<24} {:>10} {:>10} {:>10}",
            label,
            cells.len() - nulls,
            table.unique_values(name).len(),
            nulls
        );
    }
    Ok(())
}

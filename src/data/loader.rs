use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use calamine::{Data, DataType as _, Reader, open_workbook_auto};
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::columns::SHEET_HEADER_MARKER;
use super::model::{CellValue, MeasurementTable, Row};

/// Largest accepted upload.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Extensions [`load_file`] understands.
pub const ALLOWED_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv", "json", "parquet", "pq"];

/// Sheet rows scanned for the header marker before the first row is assumed
/// to be the header.
const HEADER_SEARCH_ROWS: usize = 6;

// ---------------------------------------------------------------------------
// Upload checks
// ---------------------------------------------------------------------------

/// Why a file was refused before parsing.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Extension not in [`ALLOWED_EXTENSIONS`]
    #[error("unsupported file type '.{0}' (supported: {})", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedExtension(String),

    /// File larger than [`MAX_FILE_SIZE`]
    #[error("file is {:.2} MiB, limit is {:.0} MiB", mib(.size), mib(&MAX_FILE_SIZE))]
    TooLarge {
        /// Actual size in bytes
        size: u64,
    },

    /// File metadata could not be read
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
}

fn mib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Check extension and size before a file is parsed.
pub fn check_upload(path: &Path) -> std::result::Result<(), UploadError> {
    let ext = extension_of(path);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError::UnsupportedExtension(ext));
    }
    let size = std::fs::metadata(path)?.len();
    if size > MAX_FILE_SIZE {
        return Err(UploadError::TooLarge { size });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a measurement table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.xlsx` / `.xls` – first worksheet, header located by [`SHEET_HEADER_MARKER`]
/// * `.csv`     – header row + one measurement per line
/// * `.json`    – `[{ "current": 1.0, "voltage": 20.0, ... }, ...]`
/// * `.parquet` – flat primitive columns
pub fn load_file(path: &Path) -> Result<MeasurementTable> {
    check_upload(path).with_context(|| format!("rejecting {}", path.display()))?;

    let table = match extension_of(path).as_str() {
        "parquet" | "pq" => load_parquet(path),
        "xlsx" | "xls" => load_spreadsheet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    log::info!(
        "Loaded {} rows, {} columns from {}",
        table.len(),
        table.column_names().len(),
        path.display()
    );
    Ok(table)
}

/// Outcome of [`load_files`]: every file either loaded or failed, keyed by
/// its display name, in input order.
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub loaded: Vec<(String, MeasurementTable)>,
    pub failed: Vec<(String, anyhow::Error)>,
}

/// Load several files, continuing past failures.
pub fn load_files(paths: &[PathBuf]) -> BatchLoad {
    let mut batch = BatchLoad::default();
    for path in paths {
        let name = path.display().to_string();
        match load_file(path) {
            Ok(table) => batch.loaded.push((name, table)),
            Err(e) => {
                log::warn!("{name}: {e:#}");
                batch.failed.push((name, e));
            }
        }
    }
    log::info!(
        "batch load: {} loaded, {} failed",
        batch.loaded.len(),
        batch.failed.len()
    );
    batch
}

// ---------------------------------------------------------------------------
// Spreadsheet loader
// ---------------------------------------------------------------------------

fn load_spreadsheet(path: &Path) -> Result<MeasurementTable> {
    let mut workbook = open_workbook_auto(path).context("opening workbook")?;
    let sheets = workbook.sheet_names();
    if sheets.len() > 1 {
        log::info!("{} has {} sheets, reading '{}'", path.display(), sheets.len(), sheets[0]);
    }
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no worksheets")?
        .context("reading first worksheet")?;

    let grid: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| row.iter().map(sheet_cell).collect())
        .collect();
    Ok(table_from_grid(grid))
}

fn sheet_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) => guess_cell_type(s),
        Data::DateTime(_) => cell
            .as_datetime()
            .map_or(CellValue::Null, CellValue::Timestamp),
        Data::DateTimeIso(s) => {
            CellValue::parse_timestamp(s).map_or(CellValue::Null, CellValue::Timestamp)
        }
        Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(_) | Data::Empty => CellValue::Null,
    }
}

/// Turn a worksheet grid into a table.
///
/// Instrument exports put a preamble above the data; the header is the first
/// row among the leading [`HEADER_SEARCH_ROWS`] holding a
/// [`SHEET_HEADER_MARKER`] cell, or the first row when none does. Blank header
/// cells are named `unnamed_<index>`; all-empty rows are dropped.
pub(crate) fn table_from_grid(grid: Vec<Vec<CellValue>>) -> MeasurementTable {
    let header_row = grid
        .iter()
        .take(HEADER_SEARCH_ROWS)
        .position(|row| {
            row.iter()
                .any(|c| c.to_text().trim() == SHEET_HEADER_MARKER)
        })
        .unwrap_or(0);
    if header_row > 0 {
        log::debug!("skipping {header_row} preamble rows");
    }

    let mut grid = grid.into_iter().skip(header_row);
    let Some(header) = grid.next() else {
        return MeasurementTable::default();
    };
    let headers: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, c)| match c.to_text().trim() {
            "" => format!("unnamed_{i}"),
            name => name.to_string(),
        })
        .collect();

    let rows = grid
        .filter_map(|cells| {
            let row: Row = headers.iter().cloned().zip(cells).collect();
            (!row.values().all(CellValue::is_null)).then_some(row)
        })
        .collect();
    MeasurementTable::new(headers, rows)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, one object per measurement):
///
/// ```json
/// [
///   { "current": 1.02, "voltage": 20.1, "power": 20.5, "device_type": "PVRSD-A" },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<MeasurementTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json(&text)
}

pub(crate) fn parse_json(text: &str) -> Result<MeasurementTable> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let mut column_names: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let mut row = Row::new();
        for (key, val) in obj {
            if !column_names.contains(key) {
                column_names.push(key.clone());
            }
            row.insert(key.clone(), json_to_cell(val));
        }
        rows.push(row);
    }

    Ok(MeasurementTable::new(column_names, rows))
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => match CellValue::parse_timestamp(s) {
            Some(t) => CellValue::Timestamp(t),
            None => CellValue::String(s.clone()),
        },
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names (surrounding whitespace is
/// trimmed), one measurement per record. Rows where every cell is empty are
/// dropped.
fn load_csv(path: &Path) -> Result<MeasurementTable> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .context("opening CSV")?;
    read_csv(reader)
}

pub(crate) fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<MeasurementTable> {
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let mut row = BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            let Some(col_name) = headers.get(col_idx) else {
                continue;
            };
            row.insert(col_name.clone(), guess_cell_type(value));
        }

        if row.values().all(CellValue::is_null) {
            skipped += 1;
            continue;
        }
        rows.push(row);
    }
    if skipped > 0 {
        log::warn!("Dropped {skipped} empty CSV rows");
    }

    Ok(MeasurementTable::new(headers, rows))
}

fn guess_cell_type(s: &str) -> CellValue {
    let s = s.trim();
    if s.is_empty() {
        return CellValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return CellValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return CellValue::Float(f);
    }
    if s == "true" || s == "false" {
        return CellValue::Bool(s == "true");
    }
    if let Some(t) = CellValue::parse_timestamp(s) {
        return CellValue::Timestamp(t);
    }
    CellValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file of flat measurement columns.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`), and by [`export_file`](super::export::export_file).
fn load_parquet(path: &Path) -> Result<MeasurementTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let column_names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for row in 0..batch.num_rows() {
            let mut cells = Row::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = extract_cell(batch.column(col_idx), row);
                cells.insert(field.name().clone(), value);
            }
            rows.push(cells);
        }
    }

    Ok(MeasurementTable::new(column_names, rows))
}

// -- Parquet / Arrow helpers --

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> CellValue {
    if col.is_null(row) {
        return CellValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map_or(CellValue::Null, |s| CellValue::String(s.value(row).to_string())),
        DataType::LargeUtf8 => CellValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(CellValue::Null, |a| CellValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(CellValue::Null, |a| CellValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(CellValue::Null, |a| CellValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(CellValue::Null, |a| CellValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(CellValue::Null, |a| CellValue::Bool(a.value(row))),
        DataType::Timestamp(unit, _) => {
            let nanos = match unit {
                TimeUnit::Second => any
                    .downcast_ref::<TimestampSecondArray>()
                    .and_then(|a| a.value(row).checked_mul(1_000_000_000)),
                TimeUnit::Millisecond => any
                    .downcast_ref::<TimestampMillisecondArray>()
                    .and_then(|a| a.value(row).checked_mul(1_000_000)),
                TimeUnit::Microsecond => any
                    .downcast_ref::<TimestampMicrosecondArray>()
                    .and_then(|a| a.value(row).checked_mul(1_000)),
                TimeUnit::Nanosecond => any
                    .downcast_ref::<TimestampNanosecondArray>()
                    .map(|a| a.value(row)),
            };
            nanos
                .map(|n| CellValue::Timestamp(DateTime::from_timestamp_nanos(n).naive_utc()))
                .unwrap_or(CellValue::Null)
        }
        _ => CellValue::String(format!("{:?}", col.data_type())),
    }
}

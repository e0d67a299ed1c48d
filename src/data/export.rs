use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::{Map, Number, Value as JsonValue};

use super::model::{CellValue, MeasurementTable, TIMESTAMP_FORMAT};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Write a table to a file.  Dispatch by extension (`.csv`, `.json`,
/// `.parquet` / `.pq`).
pub fn export_file(table: &MeasurementTable, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;

    match ext.as_str() {
        "csv" => write_csv(table, file),
        "json" => write_json(table, file),
        "parquet" | "pq" => write_parquet(table, file),
        other => bail!("Unsupported export extension: .{other}"),
    }?;

    log::info!("Exported {} rows to {}", table.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV / JSON writers
// ---------------------------------------------------------------------------

/// Header in column order; cells at full precision, nulls empty.
pub fn write_csv<W: Write>(table: &MeasurementTable, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(table.column_names())
        .context("writing CSV header")?;
    for row in 0..table.len() {
        let record: Vec<String> = table
            .column_names()
            .iter()
            .map(|col| table.get(row, col).to_text())
            .collect();
        out.write_record(&record)
            .with_context(|| format!("writing CSV row {row}"))?;
    }
    out.flush().context("flushing CSV")?;
    Ok(())
}

/// Records-oriented JSON array, pretty printed.
pub fn write_json<W: Write>(table: &MeasurementTable, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, &to_json(table)).context("writing JSON")
}

pub fn to_json(table: &MeasurementTable) -> JsonValue {
    let rows = (0..table.len())
        .map(|row| {
            let obj: Map<String, JsonValue> = table
                .column_names()
                .iter()
                .map(|col| (col.clone(), cell_to_json(table.get(row, col))))
                .collect();
            JsonValue::Object(obj)
        })
        .collect();
    JsonValue::Array(rows)
}

fn cell_to_json(cell: &CellValue) -> JsonValue {
    match cell {
        CellValue::String(s) => JsonValue::String(s.clone()),
        CellValue::Integer(i) => JsonValue::from(*i),
        CellValue::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        CellValue::Bool(b) => JsonValue::Bool(*b),
        CellValue::Timestamp(t) => JsonValue::String(t.format(TIMESTAMP_FORMAT).to_string()),
        CellValue::Null => JsonValue::Null,
    }
}

// ---------------------------------------------------------------------------
// Arrow / Parquet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Timestamp,
    Text,
}

/// Narrowest Arrow type that holds every non-null cell of the column.
fn infer_kind(cells: &[&CellValue]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for cell in cells {
        let this = match cell {
            CellValue::Null => continue,
            CellValue::Integer(_) => ColumnKind::Int,
            CellValue::Float(_) => ColumnKind::Float,
            CellValue::Bool(_) => ColumnKind::Bool,
            CellValue::Timestamp(_) => ColumnKind::Timestamp,
            CellValue::String(_) => return ColumnKind::Text,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Convert the table into a single Arrow record batch.
pub fn to_record_batch(table: &MeasurementTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.column_names().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.column_names().len());

    for name in table.column_names() {
        let cells = table.column(name).unwrap_or_default();
        let (data_type, array): (DataType, ArrayRef) = match infer_kind(&cells) {
            ColumnKind::Int => (
                DataType::Int64,
                Arc::new(Int64Array::from(
                    cells
                        .iter()
                        .map(|c| match c {
                            CellValue::Integer(i) => Some(*i),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(
                    cells.iter().map(|c| c.as_f64()).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Bool => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(
                    cells
                        .iter()
                        .map(|c| match c {
                            CellValue::Bool(b) => Some(*b),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Timestamp => (
                DataType::Timestamp(TimeUnit::Microsecond, None),
                Arc::new(TimestampMicrosecondArray::from(
                    cells
                        .iter()
                        .map(|c| match c {
                            CellValue::Timestamp(t) => Some(t.and_utc().timestamp_micros()),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Text => (
                DataType::Utf8,
                Arc::new(StringArray::from(
                    cells
                        .iter()
                        .map(|c| (!c.is_null()).then(|| c.to_text()))
                        .collect::<Vec<_>>(),
                )),
            ),
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    RecordBatch::try_new(schema, arrays).context("building record batch")
}

pub fn write_parquet<W: Write + Send>(table: &MeasurementTable, writer: W) -> Result<()> {
    let batch = to_record_batch(table)?;
    let mut out = ArrowWriter::try_new(writer, batch.schema(), None)
        .context("creating parquet writer")?;
    out.write(&batch).context("writing parquet batch")?;
    out.close().context("closing parquet writer")?;
    Ok(())
}

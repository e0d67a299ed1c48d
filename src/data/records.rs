use std::io::Write;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::columns::{
    CURRENT, DEVICE_ADDRESS, DEVICE_TYPE, HUMIDITY, POWER, TEMPERATURE, TIMESTAMP, VOLTAGE,
};
use super::model::{CellValue, MeasurementTable};

/// Device address used when a row does not carry one.
pub const DEFAULT_DEVICE_ADDRESS: i64 = 1;
/// Device type used when a row does not carry one.
pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

// ---------------------------------------------------------------------------
// PersistenceRecord – one stored sample
// ---------------------------------------------------------------------------

/// Flat, storage-ready form of one measurement row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    pub experiment_id: String,
    /// 1-based position of the row in the source table.
    pub sequence_number: u64,
    pub current: f64,
    pub voltage: f64,
    pub power: f64,
    pub device_address: i64,
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl PersistenceRecord {
    /// First numeric field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("current", Some(self.current)),
            ("voltage", Some(self.voltage)),
            ("power", Some(self.power)),
            ("temperature", self.temperature),
            ("humidity", self.humidity),
        ]
        .into_iter()
        .find_map(|(name, v)| v.filter(|x| !x.is_finite()).map(|_| name))
    }
}

/// Reshape every row into a [`PersistenceRecord`] tagged with `experiment_id`.
///
/// Measurement columns that are absent read as 0; cells that are present but
/// not numeric read as NaN, so run validation first. Optional fields are left
/// out rather than filled with sentinels.
pub fn to_persistence_records(
    table: &MeasurementTable,
    experiment_id: &str,
) -> Vec<PersistenceRecord> {
    let measurement = |row: usize, column: &str| -> f64 {
        if !table.has_column(column) {
            return 0.0;
        }
        table.get(row, column).to_number().unwrap_or(f64::NAN)
    };

    (0..table.len())
        .map(|row| PersistenceRecord {
            experiment_id: experiment_id.to_string(),
            sequence_number: row as u64 + 1,
            current: measurement(row, CURRENT),
            voltage: measurement(row, VOLTAGE),
            power: measurement(row, POWER),
            device_address: device_address(table.get(row, DEVICE_ADDRESS)),
            device_type: device_type(table.get(row, DEVICE_TYPE)),
            timestamp: table.get(row, TIMESTAMP).as_timestamp(),
            temperature: table.get(row, TEMPERATURE).to_number(),
            humidity: table.get(row, HUMIDITY).to_number(),
        })
        .collect()
}

/// Fractional addresses are truncated toward zero.
fn device_address(cell: &CellValue) -> i64 {
    match cell {
        CellValue::Integer(i) => *i,
        CellValue::Float(_) | CellValue::String(_) => cell
            .to_number()
            .filter(|v| v.is_finite())
            .map_or(DEFAULT_DEVICE_ADDRESS, |v| v.trunc() as i64),
        _ => DEFAULT_DEVICE_ADDRESS,
    }
}

fn device_type(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => UNKNOWN_DEVICE_TYPE.to_string(),
        CellValue::String(s) if s.trim().is_empty() => UNKNOWN_DEVICE_TYPE.to_string(),
        other => other.to_text(),
    }
}

// ---------------------------------------------------------------------------
// RecordSink – the storage collaborator
// ---------------------------------------------------------------------------

/// Why a batch could not be (fully) stored.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying writer failed
    #[error("I/O error writing records: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded
    #[error("failed to encode record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Only part of the batch was stored
    #[error("stored {written} records, {failed} failed")]
    Partial {
        /// Records persisted before the failure
        written: usize,
        /// Records not persisted
        failed: usize,
    },

    /// The store refused the batch
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Anything that can persist a batch of records.
pub trait RecordSink {
    /// Store `records` in order, returning how many were written.
    fn insert_batch(&mut self, records: &[PersistenceRecord]) -> Result<usize, SinkError>;
}

/// Writes one JSON object per line.
///
/// JSON has no NaN or infinity, so a batch containing a non-finite
/// measurement is rejected whole before anything is written.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn insert_batch(&mut self, records: &[PersistenceRecord]) -> Result<usize, SinkError> {
        if let Some((record, field)) = records
            .iter()
            .find_map(|r| r.non_finite_field().map(|field| (r, field)))
        {
            return Err(SinkError::Rejected(format!(
                "record {} has a non-finite {field}",
                record.sequence_number
            )));
        }
        for (written, record) in records.iter().enumerate() {
            let line = serde_json::to_string(record)?;
            if let Err(e) = writeln!(self.writer, "{line}") {
                log::error!("record sink failed after {written} of {} records: {e}", records.len());
                return Err(if written == 0 {
                    SinkError::Io(e)
                } else {
                    SinkError::Partial {
                        written,
                        failed: records.len() - written,
                    }
                });
            }
        }
        self.writer.flush()?;
        log::info!("wrote {} records", records.len());
        Ok(records.len())
    }
}

/// Keeps records in memory, optionally refusing batches above a size limit.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<PersistenceRecord>,
    pub max_batch: Option<usize>,
}

impl RecordSink for MemorySink {
    fn insert_batch(&mut self, records: &[PersistenceRecord]) -> Result<usize, SinkError> {
        if let Some(max) = self.max_batch {
            if records.len() > max {
                return Err(SinkError::Rejected(format!(
                    "batch of {} exceeds limit of {max}",
                    records.len()
                )));
            }
        }
        self.records.extend_from_slice(records);
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_rows() -> MeasurementTable {
        MeasurementTable::from_columns(vec![
            ("current", vec![1.0.into(), 2.0.into(), 3.0.into()]),
            ("voltage", vec![10.0.into(), 10.0.into(), 10.0.into()]),
            ("power", vec![10.0.into(), 20.0.into(), 30.0.into()]),
            ("temperature", vec![25.0.into(), CellValue::Null, 26.0.into()]),
        ])
    }

    #[test]
    fn sequence_numbers_follow_row_order() {
        let records = to_persistence_records(&three_rows(), "exp-1");
        let seq: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seq, vec![1, 2, 3]);
        assert_eq!(records[1].current, 2.0);
        assert!(records.iter().all(|r| r.experiment_id == "exp-1"));
    }

    #[test]
    fn sequence_numbers_survive_reordering_the_source() {
        let table = three_rows();
        let records = to_persistence_records(&table, "e");
        let snapshot = records.clone();

        let mut rows = table.rows().to_vec();
        rows.sort_by(|a, b| b["current"].cmp(&a["current"]));
        let reordered = MeasurementTable::new(table.column_names().to_vec(), rows);
        drop(table);

        assert_eq!(records, snapshot);
        let numbered: Vec<(u64, f64)> = records
            .iter()
            .map(|r| (r.sequence_number, r.current))
            .collect();
        assert_eq!(numbered, vec![(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert_eq!(to_persistence_records(&reordered, "e")[0].current, 3.0);
    }

    #[test]
    fn defaults_and_omissions() {
        let records = to_persistence_records(&three_rows(), "e");
        let r = &records[1];
        assert_eq!(r.device_address, DEFAULT_DEVICE_ADDRESS);
        assert_eq!(r.device_type, UNKNOWN_DEVICE_TYPE);
        assert_eq!(r.temperature, None);
        assert_eq!(r.humidity, None);
        assert_eq!(records[0].temperature, Some(25.0));

        let json = serde_json::to_value(r).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("timestamp").is_none());
        assert_eq!(json["device_type"], "unknown");
    }

    #[test]
    fn device_fields_are_read_leniently() {
        let t = MeasurementTable::from_columns(vec![
            (
                "device_address",
                vec![CellValue::Float(3.0), " 7 ".into(), "x".into(), CellValue::Float(3.5)],
            ),
            (
                "device_type",
                vec!["PVRSD-A".into(), "".into(), CellValue::Integer(5), CellValue::Null],
            ),
            (
                "timestamp",
                vec!["2024-05-01 10:00:00".into(), CellValue::Null, "bad".into()],
            ),
        ]);
        let records = to_persistence_records(&t, "e");
        let addr: Vec<i64> = records.iter().map(|r| r.device_address).collect();
        let kind: Vec<&str> = records.iter().map(|r| r.device_type.as_str()).collect();
        assert_eq!(addr, vec![3, 7, 1, 3]);
        assert_eq!(kind, vec!["PVRSD-A", "unknown", "5", "unknown"]);
        assert!(records[0].timestamp.is_some());
        assert!(records[1].timestamp.is_none());
        assert!(records[2].timestamp.is_none());
        assert_eq!(records[0].current, 0.0);
    }

    #[test]
    fn empty_table_yields_no_records() {
        assert!(to_persistence_records(&MeasurementTable::default(), "e").is_empty());
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let records = to_persistence_records(&three_rows(), "exp-9");
        let mut sink = JsonLinesSink::new(Vec::new());
        assert_eq!(sink.insert_batch(&records).unwrap(), 3);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: Vec<PersistenceRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, records);
    }

    struct FailAfter(usize);

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.contains(&b'\n') {
                if self.0 == 0 {
                    return Err(std::io::Error::other("disk full"));
                }
                self.0 -= 1;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_failure_is_reported() {
        let records = to_persistence_records(&three_rows(), "e");
        let mut sink = JsonLinesSink::new(FailAfter(2));
        match sink.insert_batch(&records) {
            Err(SinkError::Partial { written, failed }) => {
                assert_eq!((written, failed), (2, 1));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[test]
    fn memory_sink_rejects_oversized_batches() {
        let records = to_persistence_records(&three_rows(), "e");
        let mut sink = MemorySink {
            max_batch: Some(2),
            ..MemorySink::default()
        };
        assert!(matches!(
            sink.insert_batch(&records),
            Err(SinkError::Rejected(_))
        ));
        assert_eq!(sink.insert_batch(&records[..2]).unwrap(), 2);
        assert_eq!(sink.records.len(), 2);
    }

    #[test]
    fn json_lines_sink_refuses_unreadable_numbers() {
        let t = MeasurementTable::from_columns(vec![
            ("current", vec![1.0.into(), "abc".into()]),
            ("voltage", vec![10.0.into(), 10.0.into()]),
            ("power", vec![10.0.into(), 10.0.into()]),
        ]);
        let records = to_persistence_records(&t, "e");
        assert!(records[1].current.is_nan());
        assert_eq!(records[1].non_finite_field(), Some("current"));
        assert_eq!(records[0].non_finite_field(), None);

        let mut sink = JsonLinesSink::new(Vec::new());
        match sink.insert_batch(&records) {
            Err(SinkError::Rejected(msg)) => {
                assert_eq!(msg, "record 2 has a non-finite current");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(sink.into_inner().is_empty());

        let mut sink = JsonLinesSink::new(Vec::new());
        assert_eq!(sink.insert_batch(&records[..1]).unwrap(), 1);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let back: PersistenceRecord = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(back, records[0]);
    }
}

//! End-to-end: file → validate → analyse → records → export.

use std::io::Write;

use pvrsd_data::data::export::export_file;
use pvrsd_data::data::records::{JsonLinesSink, MemorySink};
use pvrsd_data::data::{
    self, AnomalyMethod, CellValue, FilterMethod, PersistenceRecord, RecordSink, loader,
};

const CSV: &str = "\
Timestamp,I,V,P,address,type,Temperature
2024-05-01 09:00:00,1.00,20.0,20.0,3,PVRSD-A,25.1
2024-05-01 09:00:01,1.02,20.1,20.5,3,PVRSD-A,25.2
2024-05-01 09:00:02,0.98,19.9,19.5,3,PVRSD-A,
2024-05-01 09:00:03,5.00,20.0,100.0,3,PVRSD-A,25.3
2024-05-01 09:00:04,1.01,20.0,20.2,3,PVRSD-A,25.3
";

fn write_csv(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("run.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(CSV.as_bytes()).unwrap();
    path
}

#[test]
fn full_pipeline_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let raw = loader::load_file(&write_csv(&dir)).unwrap();

    let (result, table) = data::normalize_and_validate(&raw);
    assert!(result.valid, "{:?}", result.messages());
    for col in ["timestamp", "current", "voltage", "power", "device_address", "device_type", "temperature"] {
        assert!(table.has_column(col), "missing {col}");
    }

    let stats = data::compute_statistics(&table);
    assert_eq!(stats.get("current_max"), Some(5.0));
    assert!((stats.get("total_energy").unwrap() - 0.1802).abs() < 1e-9);

    let flagged = data::detect_anomalies(&table, "current", AnomalyMethod::Iqr).unwrap();
    let flags: Vec<bool> = flagged
        .column("anomaly_flag")
        .unwrap()
        .into_iter()
        .map(|c| c == &CellValue::Bool(true))
        .collect();
    assert_eq!(flags, vec![false, false, false, true, false]);

    let smoothed =
        data::filter_series(&flagged, "current", FilterMethod::Median, 3).unwrap();
    assert_eq!(smoothed.get(3, "current_filtered"), &CellValue::Float(1.01));
    assert_eq!(smoothed.get(3, "current"), &CellValue::Float(5.0));

    let records = data::to_persistence_records(&smoothed, "exp-42");
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].device_address, 3);
    assert_eq!(records[0].device_type, "PVRSD-A");
    assert_eq!(records[2].temperature, None);
    assert!(records.iter().all(|r| r.timestamp.is_some()));

    let mut sink = MemorySink::default();
    assert_eq!(sink.insert_batch(&records).unwrap(), 5);

    let out = dir.path().join("smoothed.parquet");
    export_file(&smoothed, &out).unwrap();
    let back = loader::load_file(&out).unwrap();
    assert_eq!(back.len(), 5);
    assert_eq!(back.get(3, "anomaly_flag"), &CellValue::Bool(true));
}

#[test]
fn invalid_file_still_produces_a_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(
        &path,
        r#"[{"Current": "1.0", "power": 5}, {"Current": "oops", "power": 5}]"#,
    )
    .unwrap();

    let raw = loader::load_file(&path).unwrap();
    let (result, table) = data::normalize_and_validate(&raw);
    assert!(!result.valid);
    assert_eq!(
        result.messages(),
        vec![
            "missing required columns: voltage".to_string(),
            "column 'current' contains non-numeric data".to_string(),
        ]
    );
    assert!(table.get(1, "current").is_null());
}

#[test]
fn records_written_as_json_lines_can_be_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let raw = loader::load_file(&write_csv(&dir)).unwrap();
    let (_, table) = data::normalize_and_validate(&raw);
    let records = data::to_persistence_records(&table, "exp-7");

    let path = dir.path().join("records.jsonl");
    let file = std::fs::File::create(&path).unwrap();
    let mut sink = JsonLinesSink::new(file);
    sink.insert_batch(&records).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let back: Vec<PersistenceRecord> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(back, records);
    assert!(!text.lines().nth(2).unwrap().contains("temperature"));
}

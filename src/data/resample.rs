use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime};

use super::columns::TIMESTAMP;
use super::error::AnalysisError;
use super::model::{CellValue, MeasurementTable, Row};

/// Average every numeric column into fixed `interval` buckets keyed by the
/// `timestamp` column.
///
/// Buckets are aligned to the Unix epoch and only non-empty buckets are
/// emitted, in time order. A column counts as numeric when every non-null
/// cell is a number; text columns are dropped. Rows without a readable
/// timestamp are skipped.
pub fn resample(
    table: &MeasurementTable,
    interval: Duration,
) -> Result<MeasurementTable, AnalysisError> {
    let step = interval
        .num_microseconds()
        .filter(|us| *us > 0)
        .ok_or(AnalysisError::InvalidInterval)?;
    let stamps = table
        .column(TIMESTAMP)
        .ok_or_else(|| AnalysisError::ColumnNotFound(TIMESTAMP.to_string()))?;

    let numeric: Vec<&String> = table
        .column_names()
        .iter()
        .filter(|c| c.as_str() != TIMESTAMP && is_numeric_column(table, c))
        .collect();

    // bucket start (µs) → column → (sum, count)
    let mut buckets: BTreeMap<i64, BTreeMap<&str, (f64, usize)>> = BTreeMap::new();
    let mut skipped = 0usize;

    for (row, stamp) in stamps.iter().enumerate() {
        let Some(ts) = stamp.as_timestamp() else {
            skipped += 1;
            continue;
        };
        let us = ts.and_utc().timestamp_micros();
        let bucket = buckets.entry(us.div_euclid(step) * step).or_default();
        for col in &numeric {
            let acc = bucket.entry(col.as_str()).or_insert((0.0, 0));
            if let Some(v) = table.get(row, col).as_f64() {
                acc.0 += v;
                acc.1 += 1;
            }
        }
    }
    if skipped > 0 {
        log::warn!("resample skipped {skipped} rows without a timestamp");
    }

    let rows: Vec<Row> = buckets
        .into_iter()
        .map(|(start, sums)| {
            let mut row = Row::new();
            row.insert(TIMESTAMP.to_string(), bucket_start(start));
            for (col, (sum, count)) in sums {
                let mean = if count == 0 {
                    CellValue::Null
                } else {
                    CellValue::Float(sum / count as f64)
                };
                row.insert(col.to_string(), mean);
            }
            row
        })
        .collect();

    let mut names = vec![TIMESTAMP.to_string()];
    names.extend(numeric.into_iter().cloned());
    log::debug!("resampled {} rows into {} buckets", table.len(), rows.len());
    Ok(MeasurementTable::new(names, rows))
}

fn is_numeric_column(table: &MeasurementTable, column: &str) -> bool {
    let Some(cells) = table.column(column) else {
        return false;
    };
    let mut any = false;
    for cell in cells {
        match cell {
            CellValue::Null => {}
            CellValue::Float(_) | CellValue::Integer(_) => any = true,
            _ => return false,
        }
    }
    any
}

fn bucket_start(micros: i64) -> CellValue {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| CellValue::Timestamp(dt.naive_utc()))
        .unwrap_or(CellValue::Null)
}

/// Convenience for callers holding a start time and a sample index.
pub fn offset_timestamp(start: NaiveDateTime, seconds: f64) -> NaiveDateTime {
    start + Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn series() -> MeasurementTable {
        let stamps = [0.0, 0.4, 1.2, 1.6, 3.1]
            .iter()
            .map(|&s| CellValue::Timestamp(offset_timestamp(t0(), s)))
            .collect();
        MeasurementTable::from_columns(vec![
            ("timestamp", stamps),
            ("current", vec![1.0.into(), 3.0.into(), 2.0.into(), CellValue::Null, 5.0.into()]),
            ("device_type", vec!["a".into(); 5]),
            ("device_address", vec![CellValue::Integer(1); 5]),
        ])
    }

    #[test]
    fn averages_per_second() {
        let out = resample(&series(), Duration::seconds(1)).unwrap();
        assert_eq!(
            out.column_names(),
            &["timestamp", "current", "device_address"].map(String::from)
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out.numeric_column("current").unwrap(), vec![Some(2.0), Some(2.0), Some(5.0)]);
        assert_eq!(out.get(2, "timestamp"), &CellValue::Timestamp(offset_timestamp(t0(), 3.0)));
        assert_eq!(out.get(0, "device_address"), &CellValue::Float(1.0));
    }

    #[test]
    fn requires_timestamp_and_positive_interval() {
        let no_time = MeasurementTable::from_columns(vec![("current", vec![1.0.into()])]);
        assert_eq!(
            resample(&no_time, Duration::seconds(1)).unwrap_err(),
            AnalysisError::ColumnNotFound("timestamp".into())
        );
        assert_eq!(
            resample(&series(), Duration::zero()).unwrap_err(),
            AnalysisError::InvalidInterval
        );
    }

    #[test]
    fn textual_timestamps_are_accepted() {
        let t = MeasurementTable::from_columns(vec![
            ("timestamp", vec!["2024-05-01 10:00:00".into(), "2024-05-01 10:00:30".into(), "later".into()]),
            ("power", vec![10.0.into(), 20.0.into(), 99.0.into()]),
        ]);
        let out = resample(&t, Duration::minutes(1)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0, "power"), &CellValue::Float(15.0));
    }
}

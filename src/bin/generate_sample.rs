use anyhow::Result;
use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;

use pvrsd_data::data::export::export_file;
use pvrsd_data::data::model::CellValue;
use pvrsd_data::data::MeasurementTable;
use pvrsd_data::generator::{SeriesParams, generate_test_series};

/// Inject a few spikes so anomaly detection has something to find.
fn add_spikes(table: &MeasurementTable, every: usize) -> MeasurementTable {
    let rows = table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut row = row.clone();
            if i > 0 && i % every == 0 {
                let current = row.get("current").and_then(CellValue::as_f64).unwrap_or(0.0) * 3.0;
                let voltage = row.get("voltage").and_then(CellValue::as_f64).unwrap_or(0.0);
                row.insert("current".into(), CellValue::Float(current));
                row.insert("power".into(), CellValue::Float(current * voltage));
            }
            row
        })
        .collect();
    MeasurementTable::new(table.column_names().to_vec(), rows)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(42);

    let start = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap_or_default();

    let devices = [(1, "PVRSD-A"), (2, "PVRSD-B")];

    for (address, model) in devices {
        let params = SeriesParams {
            duration_s: 300,
            sampling_rate_hz: 1,
            voltage_nominal: 20.0 + address as f64 * 5.0,
            current_nominal: 1.0,
            noise_level: 0.05,
            start,
            device_address: address,
            device_type: model.to_string(),
        };
        let table = add_spikes(&generate_test_series(&params, &mut rng), 97);

        let output_path = format!("sample_{}.csv", model.to_ascii_lowercase());
        export_file(&table, output_path.as_ref())?;

        println!("Wrote {} samples for {model} to {output_path}", table.len());
    }

    Ok(())
}

use std::f64::consts::PI;

use chrono::NaiveDateTime;
use rand::Rng;

use crate::data::columns::{
    CURRENT, DEVICE_ADDRESS, DEVICE_TYPE, POWER, SEQUENCE, TIMESTAMP, VOLTAGE,
};
use crate::data::model::{CellValue, MeasurementTable};
use crate::data::resample::offset_timestamp;

/// Shape of a synthetic PVRSD test run.
#[derive(Debug, Clone)]
pub struct SeriesParams {
    /// Run length in seconds.
    pub duration_s: u32,
    /// Samples per second.
    pub sampling_rate_hz: u32,
    pub voltage_nominal: f64,
    pub current_nominal: f64,
    /// Relative Gaussian noise, 0..1.
    pub noise_level: f64,
    pub start: NaiveDateTime,
    pub device_address: i64,
    pub device_type: String,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            duration_s: 300,
            sampling_rate_hz: 1,
            voltage_nominal: 20.0,
            current_nominal: 1.0,
            noise_level: 0.05,
            start: chrono::Utc::now().naive_utc(),
            device_address: 1,
            device_type: "test device".to_string(),
        }
    }
}

/// Box-Muller transform for normal distribution
fn gauss<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + std_dev * z
}

/// Generate a run standing in for instrument acquisition: voltage with a slow
/// 0.1 Hz ripple, current with a 0.05 Hz swing, both with Gaussian noise, and
/// power as their product.
pub fn generate_test_series<R: Rng + ?Sized>(params: &SeriesParams, rng: &mut R) -> MeasurementTable {
    let n = params.duration_s as usize * params.sampling_rate_hz as usize;
    let rate = params.sampling_rate_hz.max(1) as f64;
    let span = params.duration_s as f64;

    let mut sequence = Vec::with_capacity(n);
    let mut current = Vec::with_capacity(n);
    let mut voltage = Vec::with_capacity(n);
    let mut power = Vec::with_capacity(n);
    let mut timestamp = Vec::with_capacity(n);

    for i in 0..n {
        // evenly spaced over [0, duration], endpoints included
        let t = if n > 1 { span * i as f64 / (n - 1) as f64 } else { 0.0 };
        let v = params.voltage_nominal
            * (1.0 + gauss(rng, 0.0, params.noise_level) + 0.1 * (2.0 * PI * 0.1 * t).sin());
        let c = params.current_nominal
            * (1.0 + 0.5 * (2.0 * PI * 0.05 * t).sin() + gauss(rng, 0.0, params.noise_level));

        sequence.push(CellValue::Integer(i as i64 + 1));
        current.push(CellValue::Float(c));
        voltage.push(CellValue::Float(v));
        power.push(CellValue::Float(v * c));
        timestamp.push(CellValue::Timestamp(offset_timestamp(params.start, i as f64 / rate)));
    }

    log::debug!("generated {n} synthetic samples");
    MeasurementTable::from_columns(vec![
        (SEQUENCE, sequence),
        (CURRENT, current),
        (VOLTAGE, voltage),
        (POWER, power),
        (TIMESTAMP, timestamp),
        (DEVICE_ADDRESS, vec![CellValue::Integer(params.device_address); n]),
        (DEVICE_TYPE, vec![CellValue::String(params.device_type.clone()); n]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::data::validate::normalize_and_validate;

    fn params() -> SeriesParams {
        SeriesParams {
            duration_s: 60,
            sampling_rate_hz: 2,
            start: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            ..SeriesParams::default()
        }
    }

    #[test]
    fn generated_series_is_valid() {
        let mut rng = StdRng::seed_from_u64(42);
        let t = generate_test_series(&params(), &mut rng);
        assert_eq!(t.len(), 120);
        let (result, _) = normalize_and_validate(&t);
        assert!(result.valid, "{:?}", result.messages());
    }

    #[test]
    fn timestamps_follow_sampling_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = params();
        let t = generate_test_series(&p, &mut rng);
        assert_eq!(t.get(0, "timestamp"), &CellValue::Timestamp(p.start));
        assert_eq!(
            t.get(3, "timestamp"),
            &CellValue::Timestamp(offset_timestamp(p.start, 1.5))
        );
        assert_eq!(t.get(119, "sequence"), &CellValue::Integer(120));
    }

    #[test]
    fn same_seed_same_series() {
        let a = generate_test_series(&params(), &mut StdRng::seed_from_u64(7));
        let b = generate_test_series(&params(), &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn noise_free_series_tracks_nominal() {
        let p = SeriesParams {
            noise_level: 0.0,
            ..params()
        };
        let t = generate_test_series(&p, &mut StdRng::seed_from_u64(0));
        assert_eq!(t.get(0, "voltage"), &CellValue::Float(20.0));
        assert_eq!(t.get(0, "current"), &CellValue::Float(1.0));
    }

    #[test]
    fn zero_duration_is_empty() {
        let p = SeriesParams {
            duration_s: 0,
            ..params()
        };
        assert!(generate_test_series(&p, &mut StdRng::seed_from_u64(0)).is_empty());
    }
}

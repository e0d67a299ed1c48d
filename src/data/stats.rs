use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;

use crate::config::AnomalyThresholds;

use super::columns::{ANOMALY_FLAG, CURRENT, POWER, VOLTAGE};
use super::error::AnalysisError;
use super::model::{CellValue, MeasurementTable};

/// Each row is taken to cover one second when estimating energy.
const ENERGY_SCALE: f64 = 0.001;

// ---------------------------------------------------------------------------
// Descriptive statistics
// ---------------------------------------------------------------------------

/// Metric name → value, e.g. `current_mean`, `power_stddev`, `total_energy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatisticsSummary(BTreeMap<String, f64>);

impl StatisticsSummary {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, metric: String, value: f64) {
        self.0.insert(metric, value);
    }
}

/// Summary statistics over the numeric values of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; 0 for a single value.
    pub stddev: f64,
    pub median: f64,
    pub sum: f64,
}

impl SeriesStats {
    /// `None` when there are no values.
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        let mean = sum / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(SeriesStats {
            mean,
            min,
            max,
            stddev: sample_stddev(values, mean),
            median: median(values),
            sum,
        })
    }
}

/// Compute mean / max / min / stddev / median for the measurement columns,
/// plus an energy estimate and aggregate power factor.
///
/// Non-numeric cells are skipped. A column with no numeric values contributes
/// no metrics, so a table without rows yields an empty summary.
pub fn compute_statistics(table: &MeasurementTable) -> StatisticsSummary {
    let mut summary = StatisticsSummary::default();
    let mut means: BTreeMap<&str, f64> = BTreeMap::new();

    for col in [CURRENT, VOLTAGE, POWER] {
        let Some(stats) = numeric_values(table, col).and_then(|v| SeriesStats::compute(&v))
        else {
            continue;
        };
        summary.insert(format!("{col}_mean"), stats.mean);
        summary.insert(format!("{col}_max"), stats.max);
        summary.insert(format!("{col}_min"), stats.min);
        summary.insert(format!("{col}_stddev"), stats.stddev);
        summary.insert(format!("{col}_median"), stats.median);
        means.insert(col, stats.mean);

        if col == POWER {
            summary.insert("total_energy".into(), stats.sum * ENERGY_SCALE);
        }
    }

    if let (Some(i), Some(v), Some(p)) = (means.get(CURRENT), means.get(VOLTAGE), means.get(POWER))
    {
        let denominator = i * v;
        let factor = if denominator == 0.0 { 0.0 } else { p / denominator };
        summary.insert("power_factor".into(), factor);
    }

    log::debug!("computed {} metrics over {} rows", summary.len(), table.len());
    summary
}

// ---------------------------------------------------------------------------
// Anomaly detection
// ---------------------------------------------------------------------------

/// Outlier detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyMethod {
    /// Tukey fences around the interquartile range.
    Iqr,
    /// Distance from the mean in standard deviations.
    ZScore,
}

impl FromStr for AnomalyMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iqr" => Ok(AnomalyMethod::Iqr),
            "zscore" => Ok(AnomalyMethod::ZScore),
            other => Err(AnalysisError::UnknownMethod {
                kind: "anomaly",
                name: other.to_string(),
            }),
        }
    }
}

/// Flag outliers in `column` using the default thresholds.
pub fn detect_anomalies(
    table: &MeasurementTable,
    column: &str,
    method: AnomalyMethod,
) -> Result<MeasurementTable, AnalysisError> {
    detect_anomalies_with(table, column, method, &AnomalyThresholds::default())
}

/// Return a copy of `table` with a boolean [`ANOMALY_FLAG`] column appended.
/// Non-numeric cells are never flagged.
pub fn detect_anomalies_with(
    table: &MeasurementTable,
    column: &str,
    method: AnomalyMethod,
    thresholds: &AnomalyThresholds,
) -> Result<MeasurementTable, AnalysisError> {
    let values = table
        .numeric_column(column)
        .ok_or_else(|| AnalysisError::ColumnNotFound(column.to_string()))?;
    let present: Vec<f64> = values.iter().flatten().copied().collect();

    let is_outlier: Box<dyn Fn(f64) -> bool> = match method {
        AnomalyMethod::Iqr => {
            let mut sorted = present.clone();
            sorted.sort_by(f64::total_cmp);
            match (quantile(&sorted, 0.25), quantile(&sorted, 0.75)) {
                (Some(q1), Some(q3)) => {
                    let iqr = q3 - q1;
                    let lower = q1 - thresholds.iqr_multiplier * iqr;
                    let upper = q3 + thresholds.iqr_multiplier * iqr;
                    Box::new(move |v| v < lower || v > upper)
                }
                _ => Box::new(|_| false),
            }
        }
        AnomalyMethod::ZScore => match SeriesStats::compute(&present) {
            Some(stats) if stats.stddev > 0.0 => {
                let limit = thresholds.zscore_limit;
                Box::new(move |v| ((v - stats.mean) / stats.stddev).abs() > limit)
            }
            _ => Box::new(|_| false),
        },
    };

    let flags: Vec<CellValue> = values
        .iter()
        .map(|v| CellValue::Bool(v.is_some_and(|x| is_outlier(x))))
        .collect();
    let flagged = flags.iter().filter(|f| **f == CellValue::Bool(true)).count();
    log::debug!("{method:?} flagged {flagged} of {} rows in '{column}'", table.len());

    let mut out = table.clone();
    out.append_derived_column(ANOMALY_FLAG, flags)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn numeric_values(table: &MeasurementTable, column: &str) -> Option<Vec<f64>> {
    table
        .numeric_column(column)
        .map(|v| v.into_iter().flatten().collect())
}

fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile(&sorted, 0.5).unwrap_or(f64::NAN)
}

/// Linearly interpolated quantile of already sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

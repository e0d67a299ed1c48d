use std::str::FromStr;

use super::columns;
use super::error::AnalysisError;
use super::model::{CellValue, MeasurementTable};
use super::stats::median;

// ---------------------------------------------------------------------------
// Smoothing method
// ---------------------------------------------------------------------------

/// How a series is smoothed by [`filter_series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMethod {
    /// Centered rolling mean.
    MovingAverage,
    /// Recursive EMA with span-style alpha = 2 / (window + 1).
    Exponential,
    /// Centered rolling median.
    Median,
}

impl FromStr for FilterMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moving_average" => Ok(FilterMethod::MovingAverage),
            "exponential" => Ok(FilterMethod::Exponential),
            "median" => Ok(FilterMethod::Median),
            other => Err(AnalysisError::UnknownMethod {
                kind: "filter",
                name: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry-point
// ---------------------------------------------------------------------------

/// Return a copy of `table` with `<column>_filtered` appended.
///
/// Rolling methods fall back to the raw value wherever the centered window
/// does not fit inside the series or contains a non-numeric cell, so a window
/// longer than the table yields the raw series unchanged.
pub fn filter_series(
    table: &MeasurementTable,
    column: &str,
    method: FilterMethod,
    window: usize,
) -> Result<MeasurementTable, AnalysisError> {
    if window == 0 {
        return Err(AnalysisError::InvalidWindow(window));
    }
    let values = table
        .numeric_column(column)
        .ok_or_else(|| AnalysisError::ColumnNotFound(column.to_string()))?;

    let smoothed = match method {
        FilterMethod::MovingAverage => centered_rolling(&values, window, |w| {
            w.iter().sum::<f64>() / w.len() as f64
        }),
        FilterMethod::Exponential => exponential(&values, window),
        FilterMethod::Median => centered_rolling(&values, window, median),
    };
    log::debug!(
        "{method:?} filter over '{column}' ({} rows, window {window})",
        values.len()
    );

    let cells = smoothed
        .into_iter()
        .map(|v| v.map_or(CellValue::Null, CellValue::Float))
        .collect();
    let mut out = table.clone();
    out.append_derived_column(&columns::filtered(column), cells)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Apply `reduce` over the window `[i - window/2, i + (window-1)/2]`.
fn centered_rolling<F>(values: &[Option<f64>], window: usize, reduce: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let before = window / 2;
    let after = (window - 1) / 2;
    let mut buf = Vec::with_capacity(window);

    values
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            if i < before || i + after >= values.len() {
                return *raw;
            }
            buf.clear();
            for v in &values[i - before..=i + after] {
                match v {
                    Some(x) => buf.push(*x),
                    None => return *raw,
                }
            }
            Some(reduce(&buf))
        })
        .collect()
}

/// Non-numeric cells carry the previous smoothed value; leading ones stay empty.
fn exponential(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut state: Option<f64> = None;
    values
        .iter()
        .map(|v| {
            if let Some(x) = v {
                state = Some(match state {
                    Some(prev) => alpha * x + (1.0 - alpha) * prev,
                    None => *x,
                });
            }
            state
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[f64]) -> MeasurementTable {
        MeasurementTable::from_columns(vec![(
            "current",
            values.iter().map(|&x| CellValue::Float(x)).collect(),
        )])
    }

    fn filtered(t: &MeasurementTable) -> Vec<Option<f64>> {
        t.numeric_column("current_filtered").unwrap()
    }

    #[test]
    fn moving_average_window_three() {
        let t = table(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = filter_series(&t, "current", FilterMethod::MovingAverage, 3).unwrap();
        assert_eq!(
            filtered(&out),
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]
        );
        assert_eq!(out.numeric_column("current"), t.numeric_column("current"));
    }

    #[test]
    fn moving_average_smooths_spike() {
        let t = table(&[0.0, 0.0, 9.0, 0.0, 0.0]);
        let out = filter_series(&t, "current", FilterMethod::MovingAverage, 3).unwrap();
        assert_eq!(
            filtered(&out),
            vec![Some(0.0), Some(3.0), Some(3.0), Some(3.0), Some(0.0)]
        );
    }

    #[test]
    fn even_window_leans_backwards() {
        let t = table(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = filter_series(&t, "current", FilterMethod::MovingAverage, 4).unwrap();
        assert_eq!(
            filtered(&out),
            vec![Some(1.0), Some(2.0), Some(2.5), Some(3.5), Some(5.0)]
        );
    }

    #[test]
    fn median_rejects_spike() {
        let t = table(&[1.0, 1.0, 50.0, 1.0, 1.0]);
        let out = filter_series(&t, "current", FilterMethod::Median, 3).unwrap();
        assert_eq!(filtered(&out), vec![Some(1.0); 5]);
    }

    #[test]
    fn exponential_starts_from_first_value() {
        let t = table(&[2.0, 4.0, 4.0]);
        let out = filter_series(&t, "current", FilterMethod::Exponential, 3).unwrap();
        // alpha = 0.5
        assert_eq!(filtered(&out), vec![Some(2.0), Some(3.0), Some(3.5)]);
    }

    #[test]
    fn exponential_holds_over_gaps() {
        let t = MeasurementTable::from_columns(vec![(
            "current",
            vec![CellValue::Null, CellValue::Float(2.0), CellValue::Null, CellValue::Float(4.0)],
        )]);
        let out = filter_series(&t, "current", FilterMethod::Exponential, 1).unwrap();
        assert_eq!(filtered(&out), vec![None, Some(2.0), Some(2.0), Some(4.0)]);
    }

    #[test]
    fn window_longer_than_series_keeps_raw_values() {
        let t = table(&[3.0, 1.0, 2.0]);
        for method in [FilterMethod::MovingAverage, FilterMethod::Median] {
            let out = filter_series(&t, "current", method, 10).unwrap();
            assert_eq!(filtered(&out), vec![Some(3.0), Some(1.0), Some(2.0)]);
        }
    }

    #[test]
    fn gap_inside_window_falls_back_to_raw() {
        let t = MeasurementTable::from_columns(vec![(
            "current",
            vec![
                CellValue::Float(1.0),
                CellValue::Float(2.0),
                CellValue::Null,
                CellValue::Float(4.0),
                CellValue::Float(5.0),
            ],
        )]);
        let out = filter_series(&t, "current", FilterMethod::MovingAverage, 3).unwrap();
        assert_eq!(
            filtered(&out),
            vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0)]
        );
    }

    #[test]
    fn zero_window_is_rejected() {
        let t = table(&[1.0]);
        assert_eq!(
            filter_series(&t, "current", FilterMethod::Median, 0).unwrap_err(),
            AnalysisError::InvalidWindow(0)
        );
    }

    #[test]
    fn unknown_column_is_rejected() {
        let t = table(&[1.0]);
        assert!(matches!(
            filter_series(&t, "voltage", FilterMethod::Median, 3),
            Err(AnalysisError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn method_names_parse() {
        assert_eq!(
            "moving_average".parse::<FilterMethod>().unwrap(),
            FilterMethod::MovingAverage
        );
        assert_eq!("median".parse::<FilterMethod>().unwrap(), FilterMethod::Median);
        assert!("kalman".parse::<FilterMethod>().is_err());
    }
}

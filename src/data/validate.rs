use std::fmt;

use crate::config::ValidationLimits;

use super::columns::{ALIASES, CURRENT, POWER, REQUIRED, VOLTAGE};
use super::model::{CellValue, MeasurementTable};

// ---------------------------------------------------------------------------
// Validation outcome
// ---------------------------------------------------------------------------

/// Which side of a range check a column violated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeViolation {
    Negative,
    AboveMaximum(f64),
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeViolation::Negative => write!(f, "values cannot be negative"),
            RangeViolation::AboveMaximum(max) => {
                write!(f, "values exceed the plausible maximum of {max}")
            }
        }
    }
}

/// One structural or semantic problem found in a measurement table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    /// Required columns absent after alias resolution
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// At least one cell of the column could not be read as a number
    #[error("column '{0}' contains non-numeric data")]
    NonNumericData(String),

    /// Values outside the configured physical bounds
    #[error("column '{column}': {direction}")]
    OutOfRange {
        /// Offending column
        column: String,
        /// Lower or upper bound violation
        direction: RangeViolation,
    },

    /// Some row's power differs from current × voltage beyond tolerance
    #[error("power deviates from current × voltage by more than {}%", .tolerance * 100.0)]
    PowerInconsistent {
        /// Relative tolerance that was applied
        tolerance: f64,
    },
}

/// Result of [`normalize_and_validate`]: valid iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Human-readable error strings, in detection order.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Normalize column names, coerce the measurement columns to numbers and
/// check them against the default limits.
///
/// Never fails: every problem is reported in the returned
/// [`ValidationResult`]. Callers must continue with the returned table, which
/// carries the canonical column names and coerced values.
pub fn normalize_and_validate(table: &MeasurementTable) -> (ValidationResult, MeasurementTable) {
    normalize_and_validate_with(table, &ValidationLimits::default())
}

/// [`normalize_and_validate`] with explicit limits.
pub fn normalize_and_validate_with(
    table: &MeasurementTable,
    limits: &ValidationLimits,
) -> (ValidationResult, MeasurementTable) {
    let mut table = table.clone();
    normalize_columns(&mut table);

    let mut errors = Vec::new();

    let missing: Vec<String> = REQUIRED
        .iter()
        .filter(|col| !table.has_column(col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        errors.push(ValidationIssue::MissingColumns(missing));
    }

    for col in REQUIRED {
        if table.has_column(col) && !coerce_numeric(&mut table, col) {
            errors.push(ValidationIssue::NonNumericData(col.to_string()));
        }
    }

    check_range(&table, CURRENT, limits.current_max, &mut errors);
    check_range(&table, VOLTAGE, limits.voltage_max, &mut errors);

    if REQUIRED.iter().all(|col| table.has_column(col))
        && !power_consistent(&table, limits.power_tolerance)
    {
        errors.push(ValidationIssue::PowerInconsistent {
            tolerance: limits.power_tolerance,
        });
    }

    if errors.is_empty() {
        log::debug!("validated {} rows", table.len());
    } else {
        log::warn!(
            "validation found {} problem(s) in {} rows",
            errors.len(),
            table.len()
        );
    }

    (ValidationResult::from_issues(errors), table)
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Rename the first alias found for each canonical column that is absent.
fn normalize_columns(table: &mut MeasurementTable) {
    for (canonical, aliases) in ALIASES {
        if table.has_column(canonical) {
            continue;
        }
        if let Some(alias) = aliases.iter().find(|a| table.has_column(a)) {
            log::debug!("renaming column '{alias}' to '{canonical}'");
            table.rename_column(alias, canonical);
        }
    }
}

/// Coerce a column to floats in place. Returns `false` if any cell failed.
fn coerce_numeric(table: &mut MeasurementTable, column: &str) -> bool {
    let Some(cells) = table.column(column) else {
        return true;
    };
    let coerced: Vec<CellValue> = cells
        .into_iter()
        .map(|cell| match cell.to_number() {
            Some(v) => CellValue::Float(v),
            None => CellValue::Null,
        })
        .collect();
    let all_numeric = coerced.iter().all(|c| !c.is_null());
    table.replace_column_values(column, coerced);
    all_numeric
}

fn check_range(
    table: &MeasurementTable,
    column: &str,
    max: f64,
    errors: &mut Vec<ValidationIssue>,
) {
    let Some(values) = table.numeric_column(column) else {
        return;
    };
    let values: Vec<f64> = values.into_iter().flatten().collect();

    if values.iter().any(|&v| v < 0.0) {
        errors.push(ValidationIssue::OutOfRange {
            column: column.to_string(),
            direction: RangeViolation::Negative,
        });
    }
    if values.iter().any(|&v| v > max) {
        errors.push(ValidationIssue::OutOfRange {
            column: column.to_string(),
            direction: RangeViolation::AboveMaximum(max),
        });
    }
}

/// Rows with a missing value in any of the three columns are skipped.
fn power_consistent(table: &MeasurementTable, tolerance: f64) -> bool {
    (0..table.len()).all(|row| {
        let current = table.get(row, CURRENT).as_f64();
        let voltage = table.get(row, VOLTAGE).as_f64();
        let power = table.get(row, POWER).as_f64();
        match (current, voltage, power) {
            (Some(i), Some(v), Some(p)) => {
                let expected = i * v;
                (p - expected).abs() <= tolerance * expected.abs()
            }
            _ => true,
        }
    })
}

/// Whether `name` is a canonical column or one of its accepted aliases.
pub fn is_known_column(name: &str) -> bool {
    ALIASES
        .iter()
        .any(|(canonical, aliases)| *canonical == name || aliases.contains(&name))
}

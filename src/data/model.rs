use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDateTime};

use super::error::AnalysisError;

// ---------------------------------------------------------------------------
// CellValue – a single cell in a measurement column
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value, covering what spreadsheet / CSV imports
/// produce before validation pins the measurement columns down to floats.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Null,
}

static NULL: CellValue = CellValue::Null;

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Timestamp(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Timestamp(t) => t.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v:.4}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
            CellValue::Null => write!(f, "<null>"),
        }
    }
}

/// Canonical text form for timestamps on export.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M",
];

impl CellValue {
    /// The numeric value of an `Integer` or `Float` cell. NaN counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) if !v.is_nan() => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Lenient numeric coercion: numbers, numeric text and booleans.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            CellValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Full-precision text used when writing files (no rounding, empty for
    /// null). Integral floats keep a `.0` so they read back as floats.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Float(v) if v.is_nan() => String::new(),
            CellValue::Float(v) if v.is_finite() && v.fract() == 0.0 => format!("{v:.1}"),
            CellValue::Float(v) => v.to_string(),
            CellValue::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Parse the timestamp layouts found in instrument exports.
    pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.naive_utc());
        }
        NAIVE_TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    }

    /// Interpret the cell as a timestamp (native or textual).
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Timestamp(t) => Some(*t),
            CellValue::String(s) => Self::parse_timestamp(s),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(v: NaiveDateTime) -> Self {
        CellValue::Timestamp(v)
    }
}

// ---------------------------------------------------------------------------
// MeasurementTable – rows of named cells
// ---------------------------------------------------------------------------

/// One measurement row: column_name → value. Absent keys read as `Null`.
pub type Row = BTreeMap<String, CellValue>;

/// An ordered table of measurement rows.
///
/// Column order follows the source file. Analysis steps never touch raw
/// columns; they return a copy with derived columns appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementTable {
    rows: Vec<Row>,
    column_names: Vec<String>,
    derived: BTreeSet<String>,
}

impl MeasurementTable {
    /// Build a table from rows, keeping `column_names` order first. Keys
    /// present in the rows but not listed are appended in sorted order.
    pub fn new(column_names: Vec<String>, rows: Vec<Row>) -> Self {
        let mut names: Vec<String> = Vec::with_capacity(column_names.len());
        for name in column_names {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        let extra: BTreeSet<&String> = rows
            .iter()
            .flat_map(|r| r.keys())
            .filter(|k| !names.contains(k))
            .collect();
        let extra: Vec<String> = extra.into_iter().cloned().collect();
        names.extend(extra);

        MeasurementTable {
            rows,
            column_names: names,
            derived: BTreeSet::new(),
        }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(Vec::new(), rows)
    }

    /// Build a table column-wise. Shorter columns leave trailing cells absent.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<CellValue>)>) -> Self {
        let columns: Vec<(String, Vec<CellValue>)> =
            columns.into_iter().map(|(n, v)| (n.into(), v)).collect();
        let n_rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        let mut rows = vec![Row::new(); n_rows];
        let mut names = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            for (row, value) in rows.iter_mut().zip(values) {
                row.insert(name.clone(), value);
            }
            names.push(name);
        }
        Self::new(names, rows)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names.iter().any(|c| c == name)
    }

    /// Whether `name` was appended by an analysis step.
    pub fn is_derived(&self, name: &str) -> bool {
        self.derived.contains(name)
    }

    /// Cell at (`row`, `column`); absent cells read as `Null`.
    pub fn get(&self, row: usize, column: &str) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// All cells of a column in row order, or `None` if the column is unknown.
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        if !self.has_column(name) {
            return None;
        }
        Some(
            self.rows
                .iter()
                .map(|r| r.get(name).unwrap_or(&NULL))
                .collect(),
        )
    }

    /// Column as numbers; non-numeric cells become `None`.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|cells| cells.into_iter().map(CellValue::as_f64).collect())
    }

    /// Sorted set of distinct values in a column.
    pub fn unique_values(&self, name: &str) -> BTreeSet<CellValue> {
        self.column(name)
            .map(|cells| cells.into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rename a column in place. Returns `false` (and changes nothing) when
    /// `from` is unknown or `to` already exists.
    pub(crate) fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if !self.has_column(from) || self.has_column(to) {
            return false;
        }
        for row in &mut self.rows {
            if let Some(v) = row.remove(from) {
                row.insert(to.to_string(), v);
            }
        }
        for name in &mut self.column_names {
            if name == from {
                *name = to.to_string();
            }
        }
        if self.derived.remove(from) {
            self.derived.insert(to.to_string());
        }
        true
    }

    /// Replace every cell of an existing column. Only used on owned copies.
    pub(crate) fn replace_column_values(&mut self, name: &str, values: Vec<CellValue>) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_string(), value);
        }
    }

    /// Append a derived column. Re-appending a derived column replaces it;
    /// colliding with a raw column is an error.
    pub fn append_derived_column(
        &mut self,
        name: &str,
        values: Vec<CellValue>,
    ) -> Result<(), AnalysisError> {
        if self.has_column(name) && !self.is_derived(name) {
            return Err(AnalysisError::ColumnExists(name.to_string()));
        }
        if !self.has_column(name) {
            self.column_names.push(name.to_string());
        }
        self.derived.insert(name.to_string());
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.insert(name.to_string(), values.next().unwrap_or(CellValue::Null));
        }
        Ok(())
    }
}

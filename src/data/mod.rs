/// Data layer: table model, import / export, validation and analysis.
///
/// Architecture:
/// ```text
///  .xlsx / .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → MeasurementTable
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ validate  │  alias columns, coerce numbers, range / power checks
///   └──────────┘
///        │
///        ├──────────────┬──────────────┬──────────────┐
///        ▼              ▼              ▼              ▼
///   ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
///   │  stats   │   │ anomaly  │   │  filter   │   │ resample │
///   └─────────┘   └──────────┘   └──────────┘   └──────────┘
///        │
///        ▼
///   ┌──────────┐        ┌──────────┐
///   │ records   │  ───▶  │  export   │
///   └──────────┘        └──────────┘
/// ```
pub mod columns;
pub mod error;
pub mod export;
pub mod filter;
pub mod loader;
pub mod model;
pub mod records;
pub mod resample;
pub mod stats;
pub mod validate;

pub use error::AnalysisError;
pub use filter::{FilterMethod, filter_series};
pub use model::{CellValue, MeasurementTable, Row};
pub use records::{PersistenceRecord, RecordSink, SinkError, to_persistence_records};
pub use stats::{AnomalyMethod, StatisticsSummary, compute_statistics, detect_anomalies};
pub use validate::{ValidationIssue, ValidationResult, normalize_and_validate};

//! PVRSD test-data toolkit.
//!
//! Imports measurement tables for photovoltaic rapid-shutdown devices,
//! validates and normalizes them, computes statistics, flags anomalies,
//! smooths and resamples series, and reshapes rows into storage records.
//!
//! ```no_run
//! use pvrsd_data::data::{self, AnomalyMethod, FilterMethod};
//!
//! # fn main() -> anyhow::Result<()> {
//! let raw = data::loader::load_file("run.csv".as_ref())?;
//! let (result, table) = data::normalize_and_validate(&raw);
//! if result.valid {
//!     let stats = data::compute_statistics(&table);
//!     let flagged = data::detect_anomalies(&table, "current", AnomalyMethod::Iqr)?;
//!     let smoothed = data::filter_series(&flagged, "current", FilterMethod::MovingAverage, 5)?;
//!     let records = data::to_persistence_records(&smoothed, "exp-001");
//!     println!("{} records, mean current {:?}", records.len(), stats.get("current_mean"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod generator;

pub use config::{AnalysisConfig, AnomalyThresholds, ValidationLimits};

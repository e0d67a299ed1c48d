/// Errors raised by table analysis steps (anomaly detection, filtering,
/// resampling). Validation problems are not errors; see
/// [`ValidationIssue`](super::validate::ValidationIssue).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    /// The requested column does not exist in the table
    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    /// A derived column would overwrite a raw column
    #[error("column '{0}' already exists and is not a derived column")]
    ColumnExists(String),

    /// Rolling windows must contain at least one row
    #[error("window must be a positive integer, got {0}")]
    InvalidWindow(usize),

    /// Resampling interval was zero or negative
    #[error("resample interval must be positive")]
    InvalidInterval,

    /// Method name could not be parsed
    #[error("unknown {kind} method '{name}'")]
    UnknownMethod {
        /// Which family of methods was being parsed
        kind: &'static str,
        /// The rejected name
        name: String,
    },
}

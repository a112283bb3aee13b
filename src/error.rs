//! Error types for the gene-consolidate library.

use crate::annotate::LookupError;
use std::fmt;
use thiserror::Error;

/// A table column a stage may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Resolved gene symbol.
    Symbol,
    /// Gene category (biotype).
    Category,
    /// Per-sample count columns.
    Samples,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Symbol => write!(f, "symbol"),
            Column::Category => write!(f, "category"),
            Column::Samples => write!(f, "samples"),
        }
    }
}

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ConsolidateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Duplicate feature identifier '{0}'")]
    DuplicateFeature(String),

    #[error("{stage}: missing required column '{column}'")]
    MissingColumn { stage: &'static str, column: Column },

    #[error("Incomplete predicate: min_count ({min_count:?}) and min_samples ({min_samples:?}) must be given together")]
    IncompletePredicate {
        min_count: Option<f64>,
        min_samples: Option<usize>,
    },

    #[error("Unknown merge method '{0}' (expected first, random, average or highest)")]
    UnknownMethod(String),

    #[error("{stage}: annotation lookup unavailable: {source}")]
    LookupUnavailable {
        stage: &'static str,
        #[source]
        source: LookupError,
    },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Step {step} ({stage}) failed: {source}")]
    Stage {
        step: usize,
        stage: String,
        #[source]
        source: Box<ConsolidateError>,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsolidateError {
    /// The underlying error with any pipeline stage context removed.
    pub fn root(&self) -> &ConsolidateError {
        match self {
            ConsolidateError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if this error (or its root) is a missing-column failure for `column`.
    pub fn is_missing(&self, column: Column) -> bool {
        matches!(self.root(), ConsolidateError::MissingColumn { column: c, .. } if *c == column)
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ConsolidateError>;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the analysis pipeline.
///
/// Only `EmptyDataset` is fatal to a run. Every other variant is recovered
/// at the stage that produced it and surfaced in the report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("regression did not converge after {iterations} iterations (last relative change {change:e})")]
    Convergence { iterations: usize, change: f64 },

    #[error("insufficient variation: {what}")]
    InsufficientVariation { what: String },

    #[error("weighted normal matrix is singular")]
    SingularDesign,

    #[error("{metric} is undefined: {reason}")]
    UndefinedMetric { metric: &'static str, reason: String },

    #[error("worker thread panicked while fitting {what}")]
    WorkerPanicked { what: String },

    #[error("no usable records {stage}")]
    EmptyDataset { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// A record rejected while loading the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("row {row} ({}): {kind}", user_id.as_deref().unwrap_or("<no id>"))]
pub struct ValidationError {
    pub row: usize,
    pub user_id: Option<String>,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ValidationErrorKind {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}` has out-of-range value {value}")]
    OutOfRange { field: String, value: i64 },

    #[error("duplicate user_id")]
    DuplicateUserId,
}

//! Final analysis report: JSON-serializable and printable as a terminal summary.

pub mod outcome;
pub mod summary;

pub use outcome::Outcome;

use crate::cleaning::FilterReport;
use crate::error::ValidationError;
use crate::estimation::EffectReport;
use crate::stats::ImpressionSummary;
use crate::validation::BalanceReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rejected rows kept verbatim in the report
pub const REJECTED_SAMPLE_SIZE: usize = 20;

/// Outcome of loading the raw rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// First rejections, at most `REJECTED_SAMPLE_SIZE`
    pub rejected_sample: Vec<ValidationError>,
}

impl LoadSummary {
    pub fn new(accepted: usize, rejected: &[ValidationError]) -> Self {
        Self {
            accepted,
            rejected: rejected.len(),
            rejected_sample: rejected.iter().take(REJECTED_SAMPLE_SIZE).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub load: LoadSummary,
    pub raw_impressions: Option<ImpressionSummary>,
    pub cleaned_impressions: Option<ImpressionSummary>,
    pub outliers: FilterReport,
    /// Conversion difference and covariate balance, kept in separate sections
    pub balance: BalanceReport,
    pub effect: EffectReport,
}

impl AnalysisReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub mod data;
pub mod cleaning;
pub mod stats;
pub mod validation;
pub mod estimation;
pub mod report;
pub mod pipeline;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use data::{Dataset, Group, ImpressionDay, ImpressionHour, RawRecord, Snapshot, UserRecord};
pub use cleaning::{FilterReport, OutlierFilter};
pub use stats::{Covariate, IrlsOptions, LogisticFit, ProportionTest};
pub use validation::{BalanceReport, BalanceValidator};
pub use estimation::{EffectEstimator, EffectReport, LiftSummary};
pub use report::{AnalysisReport, Outcome};
pub use pipeline::{AnalysisPipeline, AnalysisRun};
pub use error::{AnalysisError, Result, ValidationError};
pub use utils::Config;

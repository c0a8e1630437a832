//! Design-matrix construction for the logistic models.
//!
//! Categorical covariates are dummy encoded against their lowest observed
//! level. Coefficients for `mode_impression_day[3]` therefore read as the
//! log-odds shift of day 3 relative to the reference day, never in absolute
//! terms.

use crate::data::UserRecord;
use crate::error::{AnalysisError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

pub const INTERCEPT: &str = "intercept";
pub const GROUP_TERM: &str = "group[treatment]";

/// Observed exposure covariates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    TotalImpressions,
    ModeImpressionDay,
    ModeImpressionHour,
}

impl Covariate {
    pub const ALL: [Covariate; 3] = [
        Covariate::TotalImpressions,
        Covariate::ModeImpressionDay,
        Covariate::ModeImpressionHour,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Covariate::TotalImpressions => "total_impressions",
            Covariate::ModeImpressionDay => "mode_impression_day",
            Covariate::ModeImpressionHour => "mode_impression_hour",
        }
    }

    pub fn is_categorical(&self) -> bool {
        !matches!(self, Covariate::TotalImpressions)
    }

    /// Whether `records` hold at least two distinct values
    pub fn varies(&self, records: &[UserRecord]) -> bool {
        let value = |r: &UserRecord| match self {
            Covariate::TotalImpressions => r.total_impressions,
            _ => self.level(r) as u32,
        };
        match records.first() {
            Some(first) => {
                let first = value(first);
                records.iter().any(|r| value(r) != first)
            }
            None => false,
        }
    }

    /// Category level of a record; only meaningful for categorical covariates
    fn level(&self, record: &UserRecord) -> u8 {
        match self {
            Covariate::TotalImpressions => 0,
            Covariate::ModeImpressionDay => record.mode_impression_day.get(),
            Covariate::ModeImpressionHour => record.mode_impression_hour.get(),
        }
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A model term on the right-hand side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predictor {
    /// Treatment indicator, control is the reference
    Group,
    Covariate(Covariate),
}

impl Predictor {
    pub fn name(&self) -> &'static str {
        match self {
            Predictor::Group => "group",
            Predictor::Covariate(c) => c.name(),
        }
    }
}

/// Reference level chosen for a categorical predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLevel {
    pub predictor: String,
    pub level: String,
}

/// Encoded design.
///
/// `matrix` is stored transposed: one row per column of the model (intercept
/// first) and one column per observation, so each observation is a
/// contiguous column slice.
#[derive(Debug, Clone)]
pub struct Design {
    pub columns: Vec<String>,
    pub matrix: DMatrix<f64>,
    pub references: Vec<ReferenceLevel>,
    terms: Vec<(Predictor, Range<usize>)>,
}

impl Design {
    /// Encode `predictors` for `records` with an intercept column.
    ///
    /// Fails with `InsufficientVariation` when a predictor takes a single
    /// value, since its effect cannot be separated from the intercept.
    pub fn build(records: &[UserRecord], predictors: &[Predictor]) -> Result<Self> {
        if records.is_empty() {
            return Err(AnalysisError::EmptyDataset { stage: "for model fitting" });
        }

        let mut columns = vec![INTERCEPT.to_string()];
        let mut references = Vec::new();
        let mut terms = Vec::new();
        let mut encoders = Vec::new();

        for predictor in predictors {
            let start = columns.len();
            let encoder = match predictor {
                Predictor::Group => {
                    let treated = records.iter().filter(|r| r.is_treatment()).count();
                    if treated == 0 || treated == records.len() {
                        return Err(AnalysisError::InsufficientVariation {
                            what: "only one experiment group observed".to_string(),
                        });
                    }
                    columns.push(GROUP_TERM.to_string());
                    references.push(ReferenceLevel {
                        predictor: predictor.name().to_string(),
                        level: "control".to_string(),
                    });
                    Encoder::Group
                }
                Predictor::Covariate(Covariate::TotalImpressions) => {
                    let first = records[0].total_impressions;
                    if records.iter().all(|r| r.total_impressions == first) {
                        return Err(AnalysisError::InsufficientVariation {
                            what: format!("total_impressions is constant ({})", first),
                        });
                    }
                    columns.push(Covariate::TotalImpressions.name().to_string());
                    Encoder::Numeric
                }
                Predictor::Covariate(covariate) => {
                    let levels: BTreeSet<u8> = records.iter().map(|r| covariate.level(r)).collect();
                    let mut levels = levels.into_iter();
                    let reference = match (levels.next(), levels.len()) {
                        (Some(reference), rest) if rest > 0 => reference,
                        _ => {
                            return Err(AnalysisError::InsufficientVariation {
                                what: format!("{} has a single observed level", covariate),
                            })
                        }
                    };
                    references.push(ReferenceLevel {
                        predictor: covariate.name().to_string(),
                        level: reference.to_string(),
                    });

                    // Index of each non-reference level's dummy column
                    let mut offsets: [Option<usize>; 24] = [None; 24];
                    for (i, level) in levels.enumerate() {
                        offsets[level as usize] = Some(start + i);
                        columns.push(format!("{}[{}]", covariate.name(), level));
                    }
                    Encoder::Dummies { covariate: *covariate, offsets }
                }
            };
            terms.push((*predictor, start..columns.len()));
            encoders.push(encoder);
        }

        let mut matrix = DMatrix::zeros(columns.len(), records.len());
        for (j, record) in records.iter().enumerate() {
            matrix[(0, j)] = 1.0;
            for ((_, range), encoder) in terms.iter().zip(&encoders) {
                match encoder {
                    Encoder::Group => {
                        matrix[(range.start, j)] = if record.is_treatment() { 1.0 } else { 0.0 };
                    }
                    Encoder::Numeric => {
                        matrix[(range.start, j)] = record.total_impressions as f64;
                    }
                    Encoder::Dummies { covariate, offsets } => {
                        if let Some(row) = offsets[covariate.level(record) as usize] {
                            matrix[(row, j)] = 1.0;
                        }
                    }
                }
            }
        }

        Ok(Self { columns, matrix, references, terms })
    }

    pub fn n_observations(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_columns(&self) -> usize {
        self.matrix.nrows()
    }

    /// Column indices belonging to `predictor`
    pub fn term_columns(&self, predictor: Predictor) -> Option<Range<usize>> {
        self.terms
            .iter()
            .find(|(p, _)| *p == predictor)
            .map(|(_, range)| range.clone())
    }
}

enum Encoder {
    Group,
    Numeric,
    Dummies {
        covariate: Covariate,
        offsets: [Option<usize>; 24],
    },
}

/// 0/1 response vector
pub fn response<F>(records: &[UserRecord], outcome: F) -> DVector<f64>
where
    F: Fn(&UserRecord) -> bool,
{
    DVector::from_iterator(records.len(), records.iter().map(|r| if outcome(r) { 1.0 } else { 0.0 }))
}

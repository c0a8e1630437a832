//! Statistical kernels used by the validation and estimation stages.

pub mod descriptive;
pub mod proportion;
pub mod encoding;
pub mod logistic;

pub use descriptive::{median, std_dev, ImpressionSummary};
pub use proportion::{sample_ratio_test, two_proportion_test, ArmRate, ProportionTest, SampleRatioTest};
pub use encoding::{response, Covariate, Design, Predictor, ReferenceLevel, GROUP_TERM, INTERCEPT};
pub use logistic::{fit_logistic, Coefficient, IrlsOptions, LikelihoodRatio, LogisticFit};

use crate::error::{AnalysisError, Result};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::erf::{erf_inv, erfc};
use std::f64::consts::SQRT_2;

/// Two-sided p-value of a standard normal statistic
pub fn normal_two_sided_p(z: f64) -> f64 {
    erfc(z.abs() / SQRT_2)
}

/// Critical value `z` with `P(|Z| <= z) = confidence`
pub fn normal_critical_value(confidence: f64) -> f64 {
    SQRT_2 * erf_inv(confidence)
}

/// Upper tail probability of a chi-squared statistic
pub fn chi_squared_p(statistic: f64, df: usize) -> Result<f64> {
    let dist = ChiSquared::new(df as f64).map_err(|_| AnalysisError::InsufficientVariation {
        what: "chi-squared test needs at least one degree of freedom".to_string(),
    })?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

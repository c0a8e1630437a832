use crate::data::{Dataset, Group, Snapshot};
use crate::error::{AnalysisError, Result};
use crate::report::Outcome;
use crate::stats::{
    fit_logistic, response, ArmRate, Covariate, Design, IrlsOptions, LogisticFit, Predictor,
    GROUP_TERM,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Ratio of treatment to control conversion rate
///
/// Undefined when the control arm never converted; the caller gets an
/// `UndefinedMetric` error rather than an infinite or NaN ratio.
pub fn relative_lift(control: &ArmRate, treatment: &ArmRate) -> Result<f64> {
    if control.rate == 0.0 {
        return Err(AnalysisError::UndefinedMetric {
            metric: "relative lift",
            reason: "control conversion rate is zero".to_string(),
        });
    }
    Ok(treatment.rate / control.rate)
}

/// Rates and lift for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftSummary {
    pub snapshot: Snapshot,
    pub control: ArmRate,
    pub treatment: ArmRate,
    /// treatment rate minus control rate
    pub absolute_lift: f64,
    /// treatment rate over control rate
    pub relative_lift: Outcome<f64>,
    /// Conversions attributable to exposure: absolute lift times treatment size
    pub incremental_conversions: f64,
}

impl LiftSummary {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let split = dataset.split_by_group();
        let (xc, nc) = split.conversions(Group::Control);
        let (xt, nt) = split.conversions(Group::Treatment);
        let control = ArmRate::new(xc, nc)?;
        let treatment = ArmRate::new(xt, nt)?;

        let absolute_lift = treatment.rate - control.rate;
        Ok(Self {
            snapshot: dataset.snapshot(),
            control,
            treatment,
            absolute_lift,
            relative_lift: relative_lift(&control, &treatment).into(),
            incremental_conversions: absolute_lift * treatment.total as f64,
        })
    }
}

/// Covariate-adjusted treatment effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedEffect {
    /// `group[treatment]` coefficient on the log-odds scale
    pub log_odds: f64,
    pub std_error: f64,
    pub p_value: f64,
    pub odds_ratio: f64,
    pub odds_ratio_ci: (f64, f64),
    /// Covariates left out because they take a single value
    pub dropped_covariates: Vec<Covariate>,
    pub model: LogisticFit,
}

/// Everything the estimation stage reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectReport {
    /// Uncleaned data, the figure quoted to stakeholders
    pub headline: Outcome<LiftSummary>,
    pub cleaned: Outcome<LiftSummary>,
    pub adjusted: Outcome<AdjustedEffect>,
}

/// Treatment-effect estimator
///
/// Reports the headline lift on the raw snapshot, the same summary on the
/// cleaned snapshot, and a logistic regression of `converted` on group plus
/// every exposure covariate fitted on the cleaned snapshot.
#[derive(Debug, Clone, Default)]
pub struct EffectEstimator {
    options: IrlsOptions,
}

impl EffectEstimator {
    pub fn new(options: IrlsOptions) -> Self {
        Self { options }
    }

    /// Group effect adjusted for day, hour and total impressions.
    ///
    /// Covariates without variation in `dataset` are dropped with a warning
    /// instead of failing the whole model.
    pub fn adjusted_effect(&self, dataset: &Dataset) -> Result<AdjustedEffect> {
        let records = dataset.records();
        let mut predictors = vec![Predictor::Group];
        let mut dropped_covariates = Vec::new();

        for covariate in [
            Covariate::ModeImpressionDay,
            Covariate::ModeImpressionHour,
            Covariate::TotalImpressions,
        ] {
            if covariate.varies(records) {
                predictors.push(Predictor::Covariate(covariate));
            } else {
                warn!(snapshot = %dataset.snapshot(), covariate = %covariate, "Dropping constant covariate from adjusted model");
                dropped_covariates.push(covariate);
            }
        }

        let design = Design::build(records, &predictors)?;
        let y = response(records, |r| r.converted);
        let model = fit_logistic(&design, &y, self.options)?;

        let group = model
            .coefficient(GROUP_TERM)
            .cloned()
            .ok_or_else(|| AnalysisError::InsufficientVariation {
                what: "group term missing from fitted model".to_string(),
            })?;

        Ok(AdjustedEffect {
            log_odds: group.estimate,
            std_error: group.std_error,
            p_value: group.p_value,
            odds_ratio: group.odds_ratio,
            odds_ratio_ci: group.odds_ratio_ci,
            dropped_covariates,
            model,
        })
    }

    /// Run all estimates; each one is independently allowed to be unavailable
    pub fn estimate(&self, raw: &Dataset, cleaned: &Dataset) -> EffectReport {
        let headline: Outcome<LiftSummary> = LiftSummary::from_dataset(raw).into();
        let cleaned_lift: Outcome<LiftSummary> = LiftSummary::from_dataset(cleaned).into();
        let adjusted: Outcome<AdjustedEffect> = self.adjusted_effect(cleaned).into();

        for lift in [&headline, &cleaned_lift] {
            match lift {
                Outcome::Available(l) => info!(
                    snapshot = %l.snapshot,
                    control_rate = l.control.rate,
                    treatment_rate = l.treatment.rate,
                    absolute_lift = l.absolute_lift,
                    relative_lift = ?l.relative_lift.value(),
                    "Lift estimate"
                ),
                Outcome::Unavailable { reason } => warn!("Lift estimate unavailable: {}", reason),
            }
        }

        match &adjusted {
            Outcome::Available(effect) => info!(
                log_odds = effect.log_odds,
                odds_ratio = effect.odds_ratio,
                p_value = effect.p_value,
                "Adjusted treatment effect"
            ),
            Outcome::Unavailable { reason } => warn!("Adjusted treatment effect unavailable: {}", reason),
        }

        EffectReport {
            headline,
            cleaned: cleaned_lift,
            adjusted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImpressionDay, ImpressionHour, UserRecord};

    /// `n` users per arm, `xc`/`xt` converters, days and hours cycling
    fn experiment(n: usize, xc: usize, xt: usize) -> Dataset {
        let mut records = Vec::new();
        for (group, converted) in [(Group::Control, xc), (Group::Treatment, xt)] {
            for i in 0..n {
                let id = records.len();
                records.push(UserRecord::new(
                    id.to_string(),
                    group,
                    i < converted,
                    1 + (i % 17) as u32,
                    ImpressionDay::new((i % 7) as u8 + 1).unwrap(),
                    ImpressionHour::new((i % 24) as u8).unwrap(),
                ));
            }
        }
        Dataset::from_records(Snapshot::Raw, records)
    }

    #[test]
    fn test_headline_lift() {
        let raw = experiment(500, 9, 13);
        let lift = LiftSummary::from_dataset(&raw).unwrap();

        assert!((lift.control.rate - 0.018).abs() < 1e-12);
        assert!((lift.treatment.rate - 0.026).abs() < 1e-12);
        assert!((lift.absolute_lift - 0.008).abs() < 1e-12);
        let relative = *lift.relative_lift.value().unwrap();
        assert!((relative - 1.4444).abs() < 1e-3);
        assert!((lift.incremental_conversions - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_control_rate_is_undefined() {
        let raw = experiment(200, 0, 5);
        let lift = LiftSummary::from_dataset(&raw).unwrap();

        assert_eq!(lift.control.rate, 0.0);
        assert!(!lift.relative_lift.is_available());
        assert!(lift.relative_lift.reason().unwrap().contains("relative lift is undefined"));
        assert!((lift.absolute_lift - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_relative_lift_error_variant() {
        let control = ArmRate::new(0, 10).unwrap();
        let treatment = ArmRate::new(3, 10).unwrap();
        assert!(matches!(
            relative_lift(&control, &treatment),
            Err(AnalysisError::UndefinedMetric { .. })
        ));
    }

    #[test]
    fn test_adjusted_effect_direction() {
        let raw = experiment(1500, 60, 150);
        let effect = EffectEstimator::default().adjusted_effect(&raw).unwrap();

        assert!(effect.log_odds > 0.0);
        assert!(effect.odds_ratio > 1.0);
        assert!(effect.p_value < 0.001);
        assert!(effect.odds_ratio_ci.0 < effect.odds_ratio && effect.odds_ratio < effect.odds_ratio_ci.1);
        assert!(effect.dropped_covariates.is_empty());
        assert!(effect.model.coefficient("mode_impression_hour[23]").is_some());
    }

    #[test]
    fn test_constant_covariate_dropped() {
        let mut records = Vec::new();
        for (group, every) in [(Group::Control, 10), (Group::Treatment, 5)] {
            for i in 0..600usize {
                let id = records.len();
                records.push(UserRecord::new(
                    id.to_string(),
                    group,
                    i % every == 0,
                    1 + (i % 5) as u32,
                    ImpressionDay::new(3).unwrap(),
                    ImpressionHour::new(if (i / 3) % 2 == 0 { 8 } else { 20 }).unwrap(),
                ));
            }
        }
        let single_day = Dataset::from_records(Snapshot::Cleaned, records);
        let effect = EffectEstimator::default().adjusted_effect(&single_day).unwrap();

        assert_eq!(effect.dropped_covariates, vec![Covariate::ModeImpressionDay]);
        assert!(effect
            .model
            .coefficients
            .iter()
            .all(|c| !c.name.starts_with("mode_impression_day")));
    }

    #[test]
    fn test_estimate_survives_unavailable_model() {
        let raw = experiment(100, 0, 0);
        let report = EffectEstimator::default().estimate(&raw, &raw);

        assert!(report.headline.is_available());
        assert!(!report.headline.value().unwrap().relative_lift.is_available());
        assert!(!report.adjusted.is_available());
    }
}

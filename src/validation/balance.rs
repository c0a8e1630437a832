use crate::data::{Dataset, Group, Snapshot};
use crate::error::{AnalysisError, Result};
use crate::report::Outcome;
use crate::stats::{
    fit_logistic, response, sample_ratio_test, two_proportion_test, Covariate, Design,
    IrlsOptions, LogisticFit, Predictor, ProportionTest, SampleRatioTest,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A significant conversion difference is the campaign working, not a
/// randomization problem.
pub const CONVERSION_INTERPRETATION: &str = "Expected campaign effect: a significant difference in \
conversion between arms reflects exposure to the ads and says nothing about randomization quality.";

/// Significant covariate terms point the other way.
pub const BALANCE_INTERPRETATION: &str = "Randomization evidence: group assignment should not be \
predictable from exposure covariates. Significant terms are evidence against sound randomization \
and need human review; no automatic pass/fail decision is made.";

/// Randomization checks on the experiment
///
/// Runs, for both the raw and the cleaned snapshot:
/// 1. A conversion proportion test (reported, not a balance check)
/// 2. One logistic regression of group on each exposure covariate
///
/// plus an optional sample ratio check on the raw allocation. The six
/// covariate fits are independent and may run on scoped threads.
#[derive(Debug, Clone)]
pub struct BalanceValidator {
    options: IrlsOptions,
    alpha: f64,
    confidence_level: f64,
    expected_treatment_share: Option<f64>,
    parallel: bool,
}

impl Default for BalanceValidator {
    fn default() -> Self {
        Self::new(IrlsOptions::default(), 0.05)
    }
}

impl BalanceValidator {
    /// Create new balance validator
    ///
    /// # Arguments
    /// * `options` - IRLS iteration bound and tolerance
    /// * `alpha` - Significance level used to flag terms (e.g., 0.05)
    pub fn new(options: IrlsOptions, alpha: f64) -> Self {
        Self {
            options,
            alpha,
            confidence_level: 0.95,
            expected_treatment_share: None,
            parallel: true,
        }
    }

    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    /// Designed share of users in the treatment arm, enables the sample ratio check
    pub fn with_expected_treatment_share(mut self, share: Option<f64>) -> Self {
        self.expected_treatment_share = share;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Conversion proportion test on one snapshot
    pub fn proportion_test(&self, dataset: &Dataset) -> Result<ProportionTest> {
        let split = dataset.split_by_group();
        two_proportion_test(
            split.conversions(Group::Control),
            split.conversions(Group::Treatment),
            self.confidence_level,
        )
    }

    /// Logistic regression of treatment assignment on a single covariate
    pub fn covariate_balance(&self, dataset: &Dataset, covariate: Covariate) -> Result<LogisticFit> {
        let records = dataset.records();
        let design = Design::build(records, &[Predictor::Covariate(covariate)])?;
        let y = response(records, |r| r.is_treatment());
        fit_logistic(&design, &y, self.options)
    }

    /// Run every check on both snapshots
    pub fn validate(&self, raw: &Dataset, cleaned: &Dataset) -> BalanceReport {
        let sample_ratio = self.expected_treatment_share.map(|share| {
            let split = raw.split_by_group();
            let outcome: Outcome<SampleRatioTest> =
                sample_ratio_test(split.control().len(), split.treatment().len(), share).into();
            if let Some(test) = outcome.value() {
                info!(
                    expected = share,
                    observed = test.observed_treatment_share,
                    p_value = test.p_value,
                    "Sample ratio check"
                );
            }
            outcome
        });

        let conversion_tests = [raw, cleaned]
            .into_iter()
            .map(|dataset| self.conversion_difference(dataset))
            .collect();

        let jobs: Vec<(&Dataset, Covariate)> = [raw, cleaned]
            .into_iter()
            .flat_map(|dataset| Covariate::ALL.into_iter().map(move |c| (dataset, c)))
            .collect();

        let covariate_fits = jobs
            .iter()
            .zip(self.run_fits(&jobs))
            .map(|(&(dataset, covariate), result)| self.summarize_fit(dataset.snapshot(), covariate, result))
            .collect();

        BalanceReport {
            alpha: self.alpha,
            sample_ratio,
            conversion_tests,
            covariate_fits,
            conversion_interpretation: CONVERSION_INTERPRETATION.to_string(),
            balance_interpretation: BALANCE_INTERPRETATION.to_string(),
        }
    }

    fn conversion_difference(&self, dataset: &Dataset) -> ConversionDifference {
        let test: Outcome<ProportionTest> = self.proportion_test(dataset).into();
        match &test {
            Outcome::Available(t) => info!(
                snapshot = %dataset.snapshot(),
                statistic = t.statistic,
                p_value = t.p_value,
                "Conversion proportion test"
            ),
            Outcome::Unavailable { reason } => {
                warn!(snapshot = %dataset.snapshot(), "Conversion proportion test unavailable: {}", reason)
            }
        }

        ConversionDifference {
            snapshot: dataset.snapshot(),
            significant: test.value().map(|t| t.p_value < self.alpha),
            test,
        }
    }

    fn run_fits(&self, jobs: &[(&Dataset, Covariate)]) -> Vec<Result<LogisticFit>> {
        if !self.parallel {
            return jobs
                .iter()
                .map(|&(dataset, covariate)| self.covariate_balance(dataset, covariate))
                .collect();
        }

        let panicked = |covariate: Covariate| AnalysisError::WorkerPanicked {
            what: format!("balance model for {}", covariate),
        };

        crossbeam::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|&(dataset, covariate)| {
                    (covariate, scope.spawn(move |_| self.covariate_balance(dataset, covariate)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(covariate, handle)| handle.join().unwrap_or_else(|_| Err(panicked(covariate))))
                .collect()
        })
        .unwrap_or_else(|_| jobs.iter().map(|&(_, covariate)| Err(panicked(covariate))).collect())
    }

    fn summarize_fit(
        &self,
        snapshot: Snapshot,
        covariate: Covariate,
        result: Result<LogisticFit>,
    ) -> CovariateBalance {
        let fit: Outcome<LogisticFit> = result.into();
        let (significant_terms, joint_p_value) = match &fit {
            Outcome::Available(model) => {
                let terms = model.significant_terms(self.alpha);
                info!(
                    snapshot = %snapshot,
                    covariate = %covariate,
                    joint_p_value = model.likelihood_ratio.p_value,
                    significant_terms = terms.len(),
                    "Covariate balance fit"
                );
                (terms, Some(model.likelihood_ratio.p_value))
            }
            Outcome::Unavailable { reason } => {
                warn!(snapshot = %snapshot, covariate = %covariate, "Covariate balance fit unavailable: {}", reason);
                (Vec::new(), None)
            }
        };

        CovariateBalance {
            snapshot,
            covariate,
            fit,
            significant_terms,
            joint_p_value,
        }
    }
}

/// Conversion test on one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionDifference {
    pub snapshot: Snapshot,
    pub test: Outcome<ProportionTest>,
    /// `p < alpha`; expected to be true when the campaign works
    pub significant: Option<bool>,
}

/// One covariate-balance regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateBalance {
    pub snapshot: Snapshot,
    pub covariate: Covariate,
    pub fit: Outcome<LogisticFit>,
    /// Non-intercept terms with `p < alpha`
    pub significant_terms: Vec<String>,
    /// Likelihood-ratio p-value of the covariate as a whole
    pub joint_p_value: Option<f64>,
}

impl CovariateBalance {
    /// Evidence against randomization for this covariate
    pub fn is_suspect(&self, alpha: f64) -> bool {
        self.joint_p_value.map_or(false, |p| p < alpha)
    }
}

/// Everything the balance stage surfaces for human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub alpha: f64,
    pub sample_ratio: Option<Outcome<SampleRatioTest>>,
    pub conversion_tests: Vec<ConversionDifference>,
    pub covariate_fits: Vec<CovariateBalance>,
    pub conversion_interpretation: String,
    pub balance_interpretation: String,
}

impl BalanceReport {
    pub fn conversion_test(&self, snapshot: Snapshot) -> Option<&ConversionDifference> {
        self.conversion_tests.iter().find(|t| t.snapshot == snapshot)
    }

    pub fn covariate_fit(&self, snapshot: Snapshot, covariate: Covariate) -> Option<&CovariateBalance> {
        self.covariate_fits
            .iter()
            .find(|f| f.snapshot == snapshot && f.covariate == covariate)
    }

    /// Fits whose covariate jointly predicts assignment at `alpha`
    pub fn suspect_fits(&self) -> Vec<&CovariateBalance> {
        self.covariate_fits.iter().filter(|f| f.is_suspect(self.alpha)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImpressionDay, ImpressionHour, UserRecord};

    /// Balanced design: every (group, day, hour) cell identical
    fn balanced(n_per_cell: usize) -> Dataset {
        let mut records = Vec::new();
        for group in [Group::Control, Group::Treatment] {
            for day in 1..=3u8 {
                for hour in [9u8, 18] {
                    for i in 0..n_per_cell {
                        let id = records.len();
                        let converted = match group {
                            Group::Control => i % 20 == 0,
                            Group::Treatment => i % 10 == 0,
                        };
                        records.push(UserRecord::new(
                            id.to_string(),
                            group,
                            converted,
                            5 + (i % 4) as u32,
                            ImpressionDay::new(day).unwrap(),
                            ImpressionHour::new(hour).unwrap(),
                        ));
                    }
                }
            }
        }
        Dataset::from_records(Snapshot::Raw, records)
    }

    #[test]
    fn test_six_fits_reported() {
        let raw = balanced(40);
        let cleaned = raw.filter(Snapshot::Cleaned, |_| true);
        let report = BalanceValidator::default().validate(&raw, &cleaned);

        assert_eq!(report.covariate_fits.len(), 6);
        assert_eq!(report.conversion_tests.len(), 2);
        for snapshot in [Snapshot::Raw, Snapshot::Cleaned] {
            for covariate in Covariate::ALL {
                let fit = report.covariate_fit(snapshot, covariate).unwrap();
                assert!(fit.fit.is_available());
                // Identical cells: nothing predicts assignment
                assert!(fit.significant_terms.is_empty());
                assert!(!fit.is_suspect(report.alpha));
            }
        }
        assert!(report.suspect_fits().is_empty());
        assert!(report.sample_ratio.is_none());
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let raw = balanced(20);
        let cleaned = raw.filter(Snapshot::Cleaned, |r| r.total_impressions > 5);
        let parallel = BalanceValidator::default().validate(&raw, &cleaned);
        let sequential = BalanceValidator::default().with_parallel(false).validate(&raw, &cleaned);
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_conversion_difference_is_labelled_separately() {
        let raw = balanced(100);
        let cleaned = raw.filter(Snapshot::Cleaned, |_| true);
        let report = BalanceValidator::default().validate(&raw, &cleaned);

        let conversion = report.conversion_test(Snapshot::Raw).unwrap();
        let test = conversion.test.value().unwrap();
        assert!(test.difference > 0.0);
        assert_eq!(conversion.significant, Some(test.p_value < 0.05));
        assert!(report.conversion_interpretation.contains("Expected campaign effect"));
        assert!(report.balance_interpretation.contains("against sound randomization"));
    }

    #[test]
    fn test_single_level_covariate_is_unavailable_not_fatal() {
        let raw = balanced(10);
        // Only day 1 survives in the cleaned snapshot
        let cleaned = raw.filter(Snapshot::Cleaned, |r| r.mode_impression_day.get() == 1);
        let report = BalanceValidator::default().validate(&raw, &cleaned);

        let day = report.covariate_fit(Snapshot::Cleaned, Covariate::ModeImpressionDay).unwrap();
        assert!(!day.fit.is_available());
        assert!(day.fit.reason().unwrap().contains("insufficient variation"));
        assert_eq!(day.joint_p_value, None);

        // Remaining five fits still complete
        let available = report.covariate_fits.iter().filter(|f| f.fit.is_available()).count();
        assert_eq!(available, 5);
    }

    #[test]
    fn test_imbalanced_assignment_is_flagged() {
        let mut records = Vec::new();
        for i in 0..2000usize {
            // Both arms cover every day, treatment is over-represented on day 7
            let group = if i % 2 == 0 { Group::Treatment } else { Group::Control };
            let k = i / 2;
            let day = match group {
                Group::Treatment if k % 5 == 0 => 7,
                _ => (k % 7) as u8 + 1,
            };
            records.push(UserRecord::new(
                i.to_string(),
                group,
                i % 13 == 0,
                1 + (i % 9) as u32,
                ImpressionDay::new(day).unwrap(),
                ImpressionHour::new((k % 24) as u8).unwrap(),
            ));
        }
        let raw = Dataset::from_records(Snapshot::Raw, records);
        let cleaned = raw.filter(Snapshot::Cleaned, |_| true);
        let report = BalanceValidator::default().validate(&raw, &cleaned);

        let day = report.covariate_fit(Snapshot::Raw, Covariate::ModeImpressionDay).unwrap();
        assert!(day.is_suspect(report.alpha));
        assert!(day.significant_terms.contains(&"mode_impression_day[7]".to_string()));
    }

    #[test]
    fn test_sample_ratio_check_enabled() {
        let raw = balanced(10);
        let cleaned = raw.filter(Snapshot::Cleaned, |_| true);
        let report = BalanceValidator::default()
            .with_expected_treatment_share(Some(0.5))
            .validate(&raw, &cleaned);

        let srm = report.sample_ratio.unwrap();
        let test = srm.value().unwrap();
        assert!((test.observed_treatment_share - 0.5).abs() < 1e-12);
        assert!(test.p_value > 0.99);
    }

    #[test]
    fn test_convergence_failure_reported_as_unavailable() {
        let raw = balanced(20);
        let cleaned = raw.filter(Snapshot::Cleaned, |_| true);
        let validator = BalanceValidator::new(IrlsOptions { max_iterations: 0, tolerance: 1e-8 }, 0.05);
        let report = validator.validate(&raw, &cleaned);

        assert!(report.covariate_fits.iter().all(|f| !f.fit.is_available()));
        assert!(report.covariate_fits[0].fit.reason().unwrap().contains("did not converge"));
        // The proportion test does not depend on IRLS
        assert!(report.conversion_tests.iter().all(|t| t.test.is_available()));
    }
}

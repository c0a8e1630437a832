use crate::cleaning::{FilterReport, OutlierFilter};
use crate::data::{load, Dataset, RawRecord};
use crate::error::{AnalysisError, Result, ValidationError};
use crate::estimation::EffectEstimator;
use crate::report::{AnalysisReport, LoadSummary};
use crate::stats::{ImpressionSummary, IrlsOptions};
use crate::utils::Config;
use crate::validation::BalanceValidator;
use chrono::Utc;
use tracing::info;

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub raw: Dataset,
    pub cleaned: Dataset,
    pub rejected: Vec<ValidationError>,
    pub report: AnalysisReport,
}

/// Batch analysis: load, filter, validate, estimate
///
/// Every stage receives the snapshots it works on explicitly. Only an empty
/// raw or cleaned snapshot aborts a run; fit and metric failures are carried
/// into the report as unavailable entries.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    filter: OutlierFilter,
    validator: BalanceValidator,
    estimator: EffectEstimator,
}

impl Default for AnalysisPipeline {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl AnalysisPipeline {
    pub fn new(config: &Config) -> Self {
        let options = IrlsOptions {
            max_iterations: config.regression.max_iterations,
            tolerance: config.regression.tolerance,
        };

        let validator = BalanceValidator::new(options, config.analysis.significance_level)
            .with_confidence_level(config.analysis.confidence_level)
            .with_expected_treatment_share(config.balance.expected_treatment_share)
            .with_parallel(config.balance.parallel);

        Self::from_parts(
            OutlierFilter::new(config.outliers.sigma_threshold, config.outliers.min_impressions),
            validator,
            EffectEstimator::new(options),
        )
    }

    pub fn from_parts(filter: OutlierFilter, validator: BalanceValidator, estimator: EffectEstimator) -> Self {
        Self {
            filter,
            validator,
            estimator,
        }
    }

    pub fn run<I>(&self, rows: I) -> Result<AnalysisRun>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let loaded = load(rows);
        let raw = loaded.dataset;
        if raw.is_empty() {
            return Err(AnalysisError::EmptyDataset { stage: "after loading" });
        }

        let (cleaned, outliers) = self.filter.clean(&raw);
        if cleaned.is_empty() {
            return Err(AnalysisError::EmptyDataset { stage: "after outlier filtering" });
        }

        info!(raw = raw.len(), cleaned = cleaned.len(), "Validating randomization");
        let balance = self.validator.validate(&raw, &cleaned);

        info!("Estimating treatment effect");
        let effect = self.estimator.estimate(&raw, &cleaned);

        let report = self.assemble(&raw, &cleaned, &loaded.rejected, outliers, balance, effect);

        Ok(AnalysisRun {
            raw,
            cleaned,
            rejected: loaded.rejected,
            report,
        })
    }

    fn assemble(
        &self,
        raw: &Dataset,
        cleaned: &Dataset,
        rejected: &[ValidationError],
        outliers: FilterReport,
        balance: crate::validation::BalanceReport,
        effect: crate::estimation::EffectReport,
    ) -> AnalysisReport {
        AnalysisReport {
            generated_at: Utc::now(),
            load: LoadSummary::new(raw.len(), rejected),
            raw_impressions: ImpressionSummary::from_values(&raw.impressions()),
            cleaned_impressions: ImpressionSummary::from_values(&cleaned.impressions()),
            outliers,
            balance,
            effect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: usize, test: i64, converted: i64, impressions: i64) -> RawRecord {
        RawRecord::complete(
            id.to_string(),
            test,
            converted,
            impressions,
            ((id / 2) % 7) as i64 + 1,
            ((id / 2) % 3) as i64 * 8,
        )
    }

    fn rows() -> Vec<RawRecord> {
        let mut rows: Vec<RawRecord> = (0..400)
            .map(|i| {
                let test = (i % 2) as i64;
                let converted = if test == 1 { (i % 8 == 1) as i64 } else { (i % 16 == 0) as i64 };
                row(i, test, converted, 1 + (i % 30) as i64)
            })
            .collect();
        rows.push(row(400, 1, 0, 5000));
        rows.push(row(401, 0, 0, 0));
        rows.push(row(2, 0, 0, 12));
        rows.push(RawRecord { tot_impr: None, ..row(402, 0, 0, 1) });
        rows
    }

    #[test]
    fn test_run_end_to_end() {
        let run = AnalysisPipeline::default().run(rows()).unwrap();

        assert_eq!(run.raw.len(), 402);
        assert_eq!(run.rejected.len(), 2);
        assert_eq!(run.cleaned.len(), 400);
        assert_eq!(run.report.outliers.removed(), 2);
        assert_eq!(run.report.load.rejected, 2);

        let headline = run.report.effect.headline.value().unwrap();
        assert_eq!(headline.control.total, 201);
        assert!(headline.absolute_lift > 0.0);
        assert_eq!(run.report.balance.covariate_fits.len(), 6);
    }

    #[test]
    fn test_report_renders_and_serializes() {
        let run = AnalysisPipeline::default().run(rows()).unwrap();

        let summary = run.report.summary();
        assert!(summary.contains("AD EXPERIMENT ANALYSIS"));
        assert!(summary.contains("CONVERSION DIFFERENCE (EXPECTED EFFECT)"));
        assert!(summary.contains("COVARIATE BALANCE (RANDOMIZATION)"));

        let json = run.report.to_json().unwrap();
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.load, run.report.load);
        assert_eq!(back.outliers.records_out, 400);
        assert_eq!(back.balance.covariate_fits.len(), 6);
        assert!(json.contains(r#""status": "available""#));
    }

    #[test]
    fn test_no_usable_records_is_fatal() {
        let invalid = vec![RawRecord { test: Some(3), ..row(0, 0, 0, 5) }];
        assert!(matches!(
            AnalysisPipeline::default().run(invalid),
            Err(AnalysisError::EmptyDataset { stage: "after loading" })
        ));

        let unexposed = (0..10).map(|i| row(i, (i % 2) as i64, 0, 0));
        assert!(matches!(
            AnalysisPipeline::default().run(unexposed),
            Err(AnalysisError::EmptyDataset { stage: "after outlier filtering" })
        ));
    }
}

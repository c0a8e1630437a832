use crate::data::{Dataset, Snapshot, UserRecord};
use crate::stats::{median, std_dev};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Impression-count outlier filter
///
/// Removes users whose exposure would distort rate comparisons: pathological
/// high-impression users (bots, re-targeted power users) and users who never
/// saw an impression.
///
/// Algorithm:
/// 1. Compute median and sample standard deviation of `total_impressions`
/// 2. Drop records with |impressions - median| > sigma_threshold * sd
/// 3. Drop records with impressions < min_impressions
/// 4. Repeat on the survivors until a pass removes nothing
///
/// Step 4 makes the filter idempotent: cleaning a cleaned dataset is a no-op.
/// When the standard deviation is zero or undefined, step 2 is skipped.
#[derive(Debug, Clone)]
pub struct OutlierFilter {
    /// Deviation bound in standard deviations (e.g., 3.0 = 3 sigma)
    sigma_threshold: f64,

    /// Users below this impression count are excluded
    min_impressions: u32,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(3.0, 1)
    }
}

impl OutlierFilter {
    /// Create new outlier filter
    ///
    /// # Arguments
    /// * `sigma_threshold` - Allowed distance from the median in standard deviations
    /// * `min_impressions` - Minimum exposure for a user to count as observed
    pub fn new(sigma_threshold: f64, min_impressions: u32) -> Self {
        Self {
            sigma_threshold,
            min_impressions,
        }
    }

    /// Impression bounds derived from `dataset`, before any record is dropped
    pub fn fit(&self, dataset: &Dataset) -> Option<ImpressionBounds> {
        let values = dataset.impressions();
        let median = median(&values)?;
        let std_dev = std_dev(&values);

        // Zero or undefined spread disables the sigma rule entirely
        let max_deviation = std_dev
            .filter(|sd| *sd > 0.0)
            .map(|sd| self.sigma_threshold * sd);

        Some(ImpressionBounds {
            median,
            std_dev,
            max_deviation,
            min_impressions: self.min_impressions,
        })
    }

    /// Derive the cleaned snapshot from `dataset`
    ///
    /// Returns a new dataset; `dataset` is left untouched.
    pub fn clean(&self, dataset: &Dataset) -> (Dataset, FilterReport) {
        let first_pass = self.fit(dataset);
        let mut current = dataset.filter(Snapshot::Cleaned, |_| true);
        let mut removed_by_sigma = 0;
        let mut removed_by_minimum = 0;
        let mut passes = 0;

        while let Some(bounds) = self.fit(&current) {
            passes += 1;
            let (kept, sigma, minimum) = bounds.partition(&current);
            debug!(
                pass = passes,
                median = bounds.median,
                std_dev = ?bounds.std_dev,
                sigma,
                minimum,
                "Outlier pass"
            );

            removed_by_sigma += sigma;
            removed_by_minimum += minimum;
            let done = sigma + minimum == 0;
            current = kept;
            if done {
                break;
            }
        }

        let report = FilterReport {
            records_in: dataset.len(),
            records_out: current.len(),
            removed_by_sigma,
            removed_by_minimum,
            passes,
            first_pass,
        };

        info!(
            records_in = report.records_in,
            records_out = report.records_out,
            removed_by_sigma = report.removed_by_sigma,
            removed_by_minimum = report.removed_by_minimum,
            passes = report.passes,
            "Outlier filter applied"
        );

        (current, report)
    }
}

/// Acceptance region computed from one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpressionBounds {
    pub median: f64,
    pub std_dev: Option<f64>,
    /// `None` when the sigma rule does not apply
    pub max_deviation: Option<f64>,
    pub min_impressions: u32,
}

impl ImpressionBounds {
    pub fn is_sigma_outlier(&self, record: &UserRecord) -> bool {
        match self.max_deviation {
            Some(limit) => (record.total_impressions as f64 - self.median).abs() > limit,
            None => false,
        }
    }

    pub fn is_below_minimum(&self, record: &UserRecord) -> bool {
        record.total_impressions < self.min_impressions
    }

    pub fn accepts(&self, record: &UserRecord) -> bool {
        !self.is_sigma_outlier(record) && !self.is_below_minimum(record)
    }

    /// Kept records plus counts removed by each rule.
    ///
    /// A record failing both rules is counted under the sigma rule.
    fn partition(&self, dataset: &Dataset) -> (Dataset, usize, usize) {
        let sigma = dataset.count(|r| self.is_sigma_outlier(r));
        let minimum = dataset.count(|r| !self.is_sigma_outlier(r) && self.is_below_minimum(r));
        (dataset.filter(Snapshot::Cleaned, |r| self.accepts(r)), sigma, minimum)
    }
}

/// Outlier filter summary for the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub records_in: usize,
    pub records_out: usize,
    pub removed_by_sigma: usize,
    pub removed_by_minimum: usize,
    pub passes: usize,
    /// Bounds on the full input, `None` when the input was empty
    pub first_pass: Option<ImpressionBounds>,
}

impl FilterReport {
    pub fn removed(&self) -> usize {
        self.records_in - self.records_out
    }
}

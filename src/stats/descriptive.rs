use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// Median of `values`, `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(Data::new(values.to_vec()).median())
}

/// Sample standard deviation (n - 1 denominator).
///
/// `None` with fewer than two values, where it is undefined.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sd = Statistics::std_dev(values.iter());
    sd.is_finite().then_some(sd)
}

/// Location and spread of the impression column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpressionSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl ImpressionSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let median = median(values)?;
        Some(Self {
            count: values.len(),
            mean: Statistics::mean(values.iter()),
            median,
            std_dev: std_dev(values),
            min: Statistics::min(values.iter()),
            max: Statistics::max(values.iter()),
        })
    }
}

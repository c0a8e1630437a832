use crate::error::{AnalysisError, Result};
use crate::stats::{chi_squared_p, normal_critical_value, normal_two_sided_p};
use serde::{Deserialize, Serialize};

/// Conversion counts for one arm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmRate {
    pub converted: usize,
    pub total: usize,
    pub rate: f64,
}

impl ArmRate {
    pub fn new(converted: usize, total: usize) -> Result<Self> {
        if total == 0 {
            return Err(AnalysisError::EmptyDataset { stage: "in one experiment arm" });
        }
        Ok(Self {
            converted,
            total,
            rate: converted as f64 / total as f64,
        })
    }
}

/// Two-sided test of equal conversion proportions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProportionTest {
    pub control: ArmRate,
    pub treatment: ArmRate,
    /// treatment rate minus control rate
    pub difference: f64,
    /// Continuity-corrected z, signed like `difference`
    pub statistic: f64,
    /// Yates chi-squared, equal to `statistic²`
    pub chi_squared: f64,
    pub p_value: f64,
    pub confidence_level: f64,
    pub confidence_interval: (f64, f64),
}

/// Pooled two-proportion z test with Yates continuity correction.
///
/// The correction `0.5 · (1/n₁ + 1/n₂)` is capped at the observed
/// difference so it can shrink the statistic to zero but never flip its
/// sign. Swapping the arms negates `statistic` and leaves `p_value` as is.
pub fn two_proportion_test(
    control: (usize, usize),
    treatment: (usize, usize),
    confidence_level: f64,
) -> Result<ProportionTest> {
    let control = ArmRate::new(control.0, control.1)?;
    let treatment = ArmRate::new(treatment.0, treatment.1)?;

    let n_c = control.total as f64;
    let n_t = treatment.total as f64;
    let pooled = (control.converted + treatment.converted) as f64 / (n_c + n_t);
    if pooled <= 0.0 || pooled >= 1.0 {
        return Err(AnalysisError::InsufficientVariation {
            what: "conversion outcome has a single value across both arms".to_string(),
        });
    }

    let inverse_sizes = 1.0 / n_c + 1.0 / n_t;
    let difference = treatment.rate - control.rate;
    let correction = (0.5 * inverse_sizes).min(difference.abs());
    let standard_error = (pooled * (1.0 - pooled) * inverse_sizes).sqrt();

    let statistic = difference.signum() * (difference.abs() - correction) / standard_error;
    let p_value = normal_two_sided_p(statistic);

    // Unpooled interval, widened by the same correction
    let z = normal_critical_value(confidence_level);
    let unpooled_se = (control.rate * (1.0 - control.rate) / n_c
        + treatment.rate * (1.0 - treatment.rate) / n_t)
        .sqrt();
    let width = z * unpooled_se + correction;
    let confidence_interval = (
        (difference - width).max(-1.0),
        (difference + width).min(1.0),
    );

    Ok(ProportionTest {
        control,
        treatment,
        difference,
        statistic,
        chi_squared: statistic * statistic,
        p_value,
        confidence_level,
        confidence_interval,
    })
}

/// Observed allocation against the designed treatment share
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRatioTest {
    pub control: usize,
    pub treatment: usize,
    pub expected_treatment_share: f64,
    pub observed_treatment_share: f64,
    pub chi_squared: f64,
    pub p_value: f64,
}

/// Chi-squared goodness-of-fit test (df = 1) on arm sizes
pub fn sample_ratio_test(
    control: usize,
    treatment: usize,
    expected_treatment_share: f64,
) -> Result<SampleRatioTest> {
    let total = control + treatment;
    if total == 0 {
        return Err(AnalysisError::EmptyDataset { stage: "for the sample ratio test" });
    }
    if !(expected_treatment_share > 0.0 && expected_treatment_share < 1.0) {
        return Err(AnalysisError::InsufficientVariation {
            what: format!("expected treatment share {} is not strictly between 0 and 1", expected_treatment_share),
        });
    }

    let n = total as f64;
    let expected_t = n * expected_treatment_share;
    let expected_c = n - expected_t;
    let chi_squared = (treatment as f64 - expected_t).powi(2) / expected_t
        + (control as f64 - expected_c).powi(2) / expected_c;

    Ok(SampleRatioTest {
        control,
        treatment,
        expected_treatment_share,
        observed_treatment_share: treatment as f64 / n,
        chi_squared,
        p_value: chi_squared_p(chi_squared, 1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_counts() {
        let test = two_proportion_test((9, 500), (13, 500), 0.95).unwrap();

        assert!((test.control.rate - 0.018).abs() < 1e-12);
        assert!((test.treatment.rate - 0.026).abs() < 1e-12);
        assert!((test.difference - 0.008).abs() < 1e-12);
        // Matches R: prop.test(c(13, 9), c(500, 500)) -> X-squared = 0.41829
        assert!((test.chi_squared - 0.41829).abs() < 1e-4);
        assert!((test.statistic - 0.64676).abs() < 1e-4);
        assert!((test.p_value - 0.5178).abs() < 1e-3);
        assert!(test.confidence_interval.0 < 0.0);
        assert!(test.confidence_interval.1 > 0.008);
    }

    #[test]
    fn test_symmetry_under_label_swap() {
        let forward = two_proportion_test((40, 1000), (65, 900), 0.95).unwrap();
        let swapped = two_proportion_test((65, 900), (40, 1000), 0.95).unwrap();

        assert!((forward.statistic + swapped.statistic).abs() < 1e-12);
        assert!((forward.p_value - swapped.p_value).abs() < 1e-12);
        assert!(forward.statistic > 0.0);
    }

    #[test]
    fn test_large_effect_is_significant() {
        let test = two_proportion_test((100, 5000), (250, 5000), 0.95).unwrap();
        assert!(test.p_value < 1e-6);
        assert!(test.confidence_interval.0 > 0.0);
    }

    #[test]
    fn test_correction_never_flips_sign() {
        let test = two_proportion_test((10, 1000), (10, 999), 0.95).unwrap();
        assert!(test.statistic >= 0.0);
        assert!(test.p_value <= 1.0);
        assert!(test.statistic.abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(matches!(
            two_proportion_test((0, 100), (0, 100), 0.95),
            Err(AnalysisError::InsufficientVariation { .. })
        ));
        assert!(matches!(
            two_proportion_test((0, 0), (5, 100), 0.95),
            Err(AnalysisError::EmptyDataset { .. })
        ));
    }

    #[test]
    fn test_sample_ratio_balanced() {
        let srm = sample_ratio_test(5000, 5000, 0.5).unwrap();
        assert_eq!(srm.chi_squared, 0.0);
        assert!((srm.p_value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_ratio_mismatch_detected() {
        let srm = sample_ratio_test(5500, 4500, 0.5).unwrap();
        assert!((srm.chi_squared - 100.0).abs() < 1e-9);
        assert!(srm.p_value < 1e-10);
        assert!((srm.observed_treatment_share - 0.45).abs() < 1e-12);
        assert!(sample_ratio_test(10, 10, 1.0).is_err());
    }
}

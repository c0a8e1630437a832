use crate::error::{AnalysisError, Result};
use crate::stats::encoding::{Design, ReferenceLevel};
use crate::stats::{chi_squared_p, normal_critical_value, normal_two_sided_p};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest IRLS weight; keeps `z` finite when a fitted probability saturates
const MIN_WEIGHT: f64 = 1e-10;

/// Stopping rule for iteratively reweighted least squares
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    /// Bound on `|ll - ll_prev| / (|ll| + 0.1)`
    pub tolerance: f64,
}

impl Default for IrlsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
        }
    }
}

/// One estimated model coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    pub p_value: f64,
    pub odds_ratio: f64,
    /// 95% Wald interval on the odds-ratio scale
    pub odds_ratio_ci: (f64, f64),
}

impl Coefficient {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Likelihood-ratio test of the fitted model against intercept only
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodRatio {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Maximum-likelihood logistic regression result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticFit {
    pub coefficients: Vec<Coefficient>,
    pub references: Vec<ReferenceLevel>,
    pub n_observations: usize,
    pub iterations: usize,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    /// McFadden's 1 - ll / ll_null
    pub pseudo_r_squared: f64,
    pub aic: f64,
    pub likelihood_ratio: LikelihoodRatio,
}

impl LogisticFit {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// Non-intercept terms with `p < alpha`
    pub fn significant_terms(&self, alpha: f64) -> Vec<String> {
        self.coefficients
            .iter()
            .skip(1)
            .filter(|c| c.is_significant(alpha))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Fit `P(y = 1) = sigmoid(X·β)` by IRLS.
///
/// Starts from the intercept-free working response `logit((y + 0.5) / 2)`,
/// solves each weighted least-squares step through a Cholesky factorization
/// and stops once the relative log-likelihood change drops to
/// `options.tolerance`. Standard errors come from the inverse Fisher
/// information at the final estimate.
pub fn fit_logistic(design: &Design, y: &DVector<f64>, options: IrlsOptions) -> Result<LogisticFit> {
    let x = &design.matrix;
    let n = design.n_observations();
    let p = design.n_columns();

    if n == 0 {
        return Err(AnalysisError::EmptyDataset { stage: "for model fitting" });
    }
    let positives = y.iter().filter(|&&v| v > 0.5).count();
    if positives == 0 || positives == n {
        return Err(AnalysisError::InsufficientVariation {
            what: "response takes a single value".to_string(),
        });
    }

    let mut eta = y.map(|v| logit((v + 0.5) / 2.0));
    let mut ll_prev = log_likelihood(y, &eta);
    let mut beta = DVector::zeros(p);
    let mut change = f64::INFINITY;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;

        let (xtwx, xtwz) = weighted_normal_equations(x, y, &eta);
        let chol = Cholesky::new(xtwx).ok_or(AnalysisError::SingularDesign)?;
        beta = chol.solve(&xtwz);
        eta = x.tr_mul(&beta);

        let ll = log_likelihood(y, &eta);
        change = (ll - ll_prev).abs() / (ll.abs() + 0.1);
        debug!(iteration = iterations, log_likelihood = ll, change, "IRLS step");
        ll_prev = ll;

        if change <= options.tolerance {
            break;
        }
    }

    if !(change <= options.tolerance) {
        return Err(AnalysisError::Convergence { iterations, change });
    }

    // Fisher information at the converged estimate
    let (information, _) = weighted_normal_equations(x, y, &eta);
    let covariance = Cholesky::new(information)
        .ok_or(AnalysisError::SingularDesign)?
        .inverse();

    let z_crit = normal_critical_value(0.95);
    let coefficients = design
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let estimate = beta[i];
            let std_error = covariance[(i, i)].max(0.0).sqrt();
            let z_value = estimate / std_error;
            Coefficient {
                name: name.clone(),
                estimate,
                std_error,
                z_value,
                p_value: normal_two_sided_p(z_value),
                odds_ratio: estimate.exp(),
                odds_ratio_ci: (
                    (estimate - z_crit * std_error).exp(),
                    (estimate + z_crit * std_error).exp(),
                ),
            }
        })
        .collect();

    let log_likelihood = ll_prev;
    let share = positives as f64 / n as f64;
    let null_log_likelihood =
        n as f64 * (share * share.ln() + (1.0 - share) * (1.0 - share).ln());
    let statistic = (2.0 * (log_likelihood - null_log_likelihood)).max(0.0);
    let df = p - 1;
    let likelihood_ratio = LikelihoodRatio {
        statistic,
        df,
        p_value: if df == 0 { 1.0 } else { chi_squared_p(statistic, df)? },
    };

    Ok(LogisticFit {
        coefficients,
        references: design.references.clone(),
        n_observations: n,
        iterations,
        log_likelihood,
        null_log_likelihood,
        pseudo_r_squared: 1.0 - log_likelihood / null_log_likelihood,
        aic: 2.0 * p as f64 - 2.0 * log_likelihood,
        likelihood_ratio,
    })
}

/// `(Xᵀ W X, Xᵀ W z)` for the working response at `eta`
fn weighted_normal_equations(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    eta: &DVector<f64>,
) -> (DMatrix<f64>, DVector<f64>) {
    let p = x.nrows();
    let mut xtwx = DMatrix::zeros(p, p);
    let mut xtwz = DVector::zeros(p);

    for (i, column) in x.column_iter().enumerate() {
        let mu = sigmoid(eta[i]);
        let w = (mu * (1.0 - mu)).max(MIN_WEIGHT);
        let z = eta[i] + (y[i] - mu) / w;
        xtwx.ger(w, &column, &column, 1.0);
        xtwz.axpy(w * z, &column, 1.0);
    }

    (xtwx, xtwz)
}

fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Bernoulli log-likelihood `Σ y·η − log(1 + e^η)`
fn log_likelihood(y: &DVector<f64>, eta: &DVector<f64>) -> f64 {
    y.iter()
        .zip(eta.iter())
        .map(|(&yi, &e)| {
            let softplus = if e > 0.0 { e + (-e).exp().ln_1p() } else { e.exp().ln_1p() };
            yi * e - softplus
        })
        .sum()
}

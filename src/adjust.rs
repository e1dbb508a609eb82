//! # Index Event Adjustment
//!
//! Top-level orchestration: regress the subsequent-trait effects on the
//! incidence effects, correct the fitted slope for regression dilution with
//! one of three methods, then propagate the corrected slope into adjusted
//! per-element effects, standard errors and p-values via the delta method.
//!
//! The closed-form corrections rescale the raw weighted slope by a dilution
//! factor; the simulation method rebuilds the slope from the estimate table
//! through the profile likelihood and recovers its variance from the
//! likelihood-ratio interval width.

use ndarray::{Array1, Zip};
use serde::Serialize;
use thiserror::Error;

use crate::data::{self, AdjustmentInput, InputError};
use crate::interval::{self, CONFIDENCE_LEVEL, ConfidenceInterval};
use crate::profile::{ProfileError, ProfileLikelihood};
use crate::regress::{self, FitError};
use crate::simulate::{self, SimexError, SimexEstimateTable};

/// Per-element summary statistics for one incidence/subsequent trait pair.
#[derive(Debug, Clone)]
pub struct SummaryStatistics {
    incidence: Array1<f64>,
    incidence_se: Array1<f64>,
    subsequent: Array1<f64>,
    subsequent_se: Array1<f64>,
}

impl SummaryStatistics {
    pub fn new(
        incidence: Array1<f64>,
        incidence_se: Array1<f64>,
        subsequent: Array1<f64>,
        subsequent_se: Array1<f64>,
    ) -> Result<Self, InputError> {
        let n = incidence.len();
        if incidence_se.len() != n || subsequent.len() != n || subsequent_se.len() != n {
            return Err(InputError::MismatchedSummaryLengths {
                incidence: n,
                incidence_se: incidence_se.len(),
                subsequent: subsequent.len(),
                subsequent_se: subsequent_se.len(),
            });
        }
        for (index, &value) in subsequent_se.iter().enumerate() {
            if !value.is_finite() {
                return Err(InputError::NonFiniteValue("subsequent standard errors"));
            }
            if value < 0.0 {
                return Err(InputError::NegativeStandardError { index, value });
            }
        }
        Ok(Self {
            incidence,
            incidence_se,
            subsequent,
            subsequent_se,
        })
    }

    pub fn len(&self) -> usize {
        self.incidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidence.is_empty()
    }
}

/// The dilution correction to apply to the raw regression slope.
#[derive(Debug, Clone)]
pub enum CorrectionMethod {
    /// Simulation-extrapolation with profile-likelihood estimation.
    Simex {
        multipliers: Vec<f64>,
        replicates: usize,
        seed: u64,
    },
    /// Corrected weighted least squares: rescales by the weighted predictor
    /// scatter over the scatter net of measurement-error variance.
    CorrectedWeightedLeastSquares,
    /// Hedges-Olkin reliability correction with unweighted variances.
    HedgesOlkin,
}

/// A corrected slope with its variance and, for the simulation method, the
/// interval and estimate table behind it.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectedSlope {
    pub slope: f64,
    pub variance: f64,
    pub interval: Option<ConfidenceInterval>,
    pub table: Option<SimexEstimateTable>,
}

/// Adjusted per-element statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustedStatistics {
    pub correction: CorrectedSlope,
    pub effects: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub p_values: Array1<f64>,
}

/// Errors from the adjustment pipeline.
#[derive(Error, Debug)]
pub enum AdjustError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error(transparent)]
    Simulation(#[from] SimexError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("dilution correction is degenerate: corrected scatter {denominator:.6e} is not positive")]
    DegenerateDilution { denominator: f64 },
}

/// Runs the full adjustment: correct the slope, then shift every element's
/// subsequent-trait statistics by its incidence effect times that slope.
pub fn adjust(
    stats: &SummaryStatistics,
    weights: Option<Array1<f64>>,
    method: &CorrectionMethod,
) -> Result<AdjustedStatistics, AdjustError> {
    let input = AdjustmentInput::new(
        stats.incidence.clone(),
        stats.incidence_se.clone(),
        stats.subsequent.clone(),
        weights,
    )?;
    let correction = corrected_slope(&input, method)?;
    log::info!(
        "corrected slope {:.6} (variance {:.3e}) across {} elements",
        correction.slope,
        correction.variance,
        stats.len()
    );
    Ok(propagate(stats, correction))
}

/// Corrects the regression slope of the outcome on the predictor for
/// dilution, using the requested method.
pub fn corrected_slope(
    input: &AdjustmentInput,
    method: &CorrectionMethod,
) -> Result<CorrectedSlope, AdjustError> {
    match method {
        CorrectionMethod::Simex {
            multipliers,
            replicates,
            seed,
        } => {
            let table = simulate::simulate(input, multipliers, *replicates, *seed)?;
            let profile = ProfileLikelihood::new(&table, input.variance_ratio())?;
            let maximum = profile.maximize()?;
            let interval = interval::likelihood_ratio_interval(&profile, &maximum)?;
            let z = normal_quantile(0.5 + CONFIDENCE_LEVEL / 2.0);
            let variance = (interval.width() / (2.0 * z)).powi(2);
            Ok(CorrectedSlope {
                slope: maximum.slope,
                variance,
                interval: Some(interval),
                table: Some(table),
            })
        }
        CorrectionMethod::CorrectedWeightedLeastSquares => {
            let (fit, raw_variance) = raw_fit(input)?;
            let w = input.weights();
            let x = input.predictor();
            let weighted_mean = w.dot(x) / w.sum();
            let scatter = Zip::from(w)
                .and(x)
                .fold(0.0, |acc, &wi, &xi| acc + wi * (xi - weighted_mean).powi(2));
            let error_mass = Zip::from(w)
                .and(input.standard_errors())
                .fold(0.0, |acc, &wi, &se| acc + wi * se * se);
            rescale(fit.slope, raw_variance, scatter, scatter - error_mass)
        }
        CorrectionMethod::HedgesOlkin => {
            let (fit, raw_variance) = raw_fit(input)?;
            let scatter = data::sample_variance(input.predictor());
            let mean_error = input.standard_errors().mapv(|se| se * se).mean().unwrap_or(0.0);
            rescale(fit.slope, raw_variance, scatter, scatter - mean_error)
        }
    }
}

fn raw_fit(input: &AdjustmentInput) -> Result<(regress::WeightedFit, f64), AdjustError> {
    let fit = regress::weighted_fit(
        input.predictor().view(),
        input.outcome().view(),
        input.weights().view(),
    )?;
    let variance = regress::sandwich_variance(
        input.predictor().view(),
        fit.residuals.view(),
        input.weights().view(),
    )?;
    Ok((fit, variance))
}

fn rescale(
    slope: f64,
    variance: f64,
    scatter: f64,
    denominator: f64,
) -> Result<CorrectedSlope, AdjustError> {
    if denominator <= 0.0 {
        return Err(AdjustError::DegenerateDilution { denominator });
    }
    let factor = scatter / denominator;
    Ok(CorrectedSlope {
        slope: slope * factor,
        variance: variance * factor * factor,
        interval: None,
        table: None,
    })
}

fn propagate(stats: &SummaryStatistics, correction: CorrectedSlope) -> AdjustedStatistics {
    let slope = correction.slope;
    let slope_variance = correction.variance;

    let effects: Array1<f64> = Zip::from(&stats.subsequent)
        .and(&stats.incidence)
        .map_collect(|&sub, &inc| sub - slope * inc);
    let standard_errors: Array1<f64> = Zip::from(&stats.subsequent_se)
        .and(&stats.incidence_se)
        .and(&stats.incidence)
        .map_collect(|&se_sub, &se_inc, &inc| {
            (se_sub * se_sub + slope * slope * se_inc * se_inc + slope_variance * inc * inc)
                .sqrt()
        });
    let p_values: Array1<f64> = Zip::from(&effects)
        .and(&standard_errors)
        .map_collect(|&effect, &se| {
            if se > 0.0 {
                2.0 * normal_cdf(-(effect / se).abs())
            } else if effect == 0.0 {
                1.0
            } else {
                0.0
            }
        });

    AdjustedStatistics {
        correction,
        effects,
        standard_errors,
        p_values,
    }
}

/// Standard normal CDF via the complementary error function.
fn normal_cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile.
fn normal_quantile(p: f64) -> f64 {
    use statrs::distribution::{ContinuousCDF, Normal};
    Normal::new(0.0, 1.0)
        .expect("unit normal parameters are valid")
        .inverse_cdf(p)
}

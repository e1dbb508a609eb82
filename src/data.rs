//! # Input Validation Module
//!
//! This module is the exclusive entry point for caller-provided data. Its
//! responsibility is to take the raw effect vectors, check them against the
//! preconditions the simulation and likelihood stages rely on, and hand the
//! rest of the crate a container whose invariants are already established.
//!
//! - Fail fast: every precondition violation is rejected here, before any
//!   random draw or fit happens downstream.
//! - Caller-centric errors: failures are assumed to be caller-input errors.
//!   The `InputError` enum names the violated precondition directly.

use ndarray::Array1;
use thiserror::Error;

/// Minimum number of observations for a slope, an intercept, and at least
/// one residual degree of freedom.
const MINIMUM_OBSERVATIONS: usize = 3;

/// A comprehensive error type for all input validation failures.
#[derive(Error, Debug)]
pub enum InputError {
    #[error(
        "predictor ({predictor}), standard errors ({standard_errors}), outcome ({outcome}) and weights ({weights}) must all have the same length"
    )]
    MismatchedLengths {
        predictor: usize,
        standard_errors: usize,
        outcome: usize,
        weights: usize,
    },

    #[error("at least {required} observations are required, but only {found} were supplied")]
    TooFewObservations { found: usize, required: usize },

    #[error("non-finite value found in the '{0}' vector")]
    NonFiniteValue(&'static str),

    #[error("standard error at index {index} is negative ({value})")]
    NegativeStandardError { index: usize, value: f64 },

    #[error("weight at index {index} is not positive ({value})")]
    NonPositiveWeight { index: usize, value: f64 },

    #[error("the noise multiplier grid is empty")]
    EmptyMultiplierGrid,

    #[error("noise multiplier at index {index} is not positive ({value})")]
    NonPositiveMultiplier { index: usize, value: f64 },

    #[error("noise multiplier grid must be strictly ascending (violated at index {index})")]
    NonAscendingMultiplier { index: usize },

    #[error("replicate count must be at least 1")]
    InvalidReplicateCount,

    #[error("the estimate table must start with the unperturbed row (lambda = 0)")]
    MissingSentinelRow,

    #[error(
        "incidence ({incidence}), incidence standard errors ({incidence_se}), subsequent ({subsequent}) and subsequent standard errors ({subsequent_se}) must all have the same length"
    )]
    MismatchedSummaryLengths {
        incidence: usize,
        incidence_se: usize,
        subsequent: usize,
        subsequent_se: usize,
    },
}

/// Validated per-element data for one dilution adjustment: the predictor
/// effects, their standard errors, the outcome effects, and regression
/// weights (uniform when the caller supplies none).
#[derive(Debug, Clone)]
pub struct AdjustmentInput {
    predictor: Array1<f64>,
    standard_errors: Array1<f64>,
    outcome: Array1<f64>,
    weights: Array1<f64>,
}

impl AdjustmentInput {
    /// Validates the raw vectors and builds the input container.
    ///
    /// When `weights` is `None`, uniform weights of 1.0 are used.
    pub fn new(
        predictor: Array1<f64>,
        standard_errors: Array1<f64>,
        outcome: Array1<f64>,
        weights: Option<Array1<f64>>,
    ) -> Result<Self, InputError> {
        let n = predictor.len();
        let weights = weights.unwrap_or_else(|| Array1::from_elem(n, 1.0));

        if standard_errors.len() != n || outcome.len() != n || weights.len() != n {
            return Err(InputError::MismatchedLengths {
                predictor: n,
                standard_errors: standard_errors.len(),
                outcome: outcome.len(),
                weights: weights.len(),
            });
        }
        if n < MINIMUM_OBSERVATIONS {
            return Err(InputError::TooFewObservations {
                found: n,
                required: MINIMUM_OBSERVATIONS,
            });
        }

        validate_is_finite(&predictor, "predictor")?;
        validate_is_finite(&standard_errors, "standard errors")?;
        validate_is_finite(&outcome, "outcome")?;
        validate_is_finite(&weights, "weights")?;

        for (index, &value) in standard_errors.iter().enumerate() {
            if value < 0.0 {
                return Err(InputError::NegativeStandardError { index, value });
            }
        }
        for (index, &value) in weights.iter().enumerate() {
            if value <= 0.0 {
                return Err(InputError::NonPositiveWeight { index, value });
            }
        }

        Ok(Self {
            predictor,
            standard_errors,
            outcome,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.predictor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictor.is_empty()
    }

    pub fn predictor(&self) -> &Array1<f64> {
        &self.predictor
    }

    pub fn standard_errors(&self) -> &Array1<f64> {
        &self.standard_errors
    }

    pub fn outcome(&self) -> &Array1<f64> {
        &self.outcome
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Ratio of the predictor sample variance to the outcome sample variance.
    ///
    /// This is the fixed scale constant the profile likelihood uses to bound
    /// the admissible nuisance region. It is computed once from the same
    /// vectors the fits consume and never re-estimated.
    pub fn variance_ratio(&self) -> f64 {
        sample_variance(&self.predictor) / sample_variance(&self.outcome)
    }
}

/// Validates the simulation settings that arrive alongside the data: the
/// noise multiplier grid (strictly positive, strictly ascending) and the
/// Monte-Carlo replicate count.
pub fn validate_simulation_settings(
    multipliers: &[f64],
    replicates: usize,
) -> Result<(), InputError> {
    if replicates < 1 {
        return Err(InputError::InvalidReplicateCount);
    }
    if multipliers.is_empty() {
        return Err(InputError::EmptyMultiplierGrid);
    }
    for (index, &value) in multipliers.iter().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(InputError::NonPositiveMultiplier { index, value });
        }
        if index > 0 && value <= multipliers[index - 1] {
            return Err(InputError::NonAscendingMultiplier { index });
        }
    }
    Ok(())
}

fn validate_is_finite(values: &Array1<f64>, name: &'static str) -> Result<(), InputError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(InputError::NonFiniteValue(name));
    }
    Ok(())
}

pub(crate) fn sample_variance(values: &Array1<f64>) -> f64 {
    let n = values.len() as f64;
    let mean = values.sum() / n;
    values.mapv(|v| (v - mean) * (v - mean)).sum() / (n - 1.0)
}

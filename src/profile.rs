//! # Profile Likelihood Engine
//!
//! Fits the two-parameter attenuation model to the estimate table and
//! profiles out the nuisance scale. At noise multiplier `lambda` the model
//! mean slope is
//!
//! ```text
//! mean(lambda) = pmean / (1 + (lambda + 1) * exp(pvar))
//! ```
//!
//! where `pmean` is the de-diluted slope and `exp(pvar)` the ratio of
//! measurement-error variance to true-predictor variance. The `+ 1` inside
//! the parenthesis makes the unperturbed row itself carry attenuation: the
//! observed fit is already diluted before any noise is injected.
//!
//! The nuisance lives on the log scale, which keeps the ratio positive by
//! construction. This is a nested optimization: an outer search over the
//! candidate slope, and for each candidate an inner minimization of the
//! joint negative log-likelihood over `pvar` alone.

use std::cell::RefCell;
use std::f64::consts::PI;

use thiserror::Error;

use crate::optim::{self, OptimError};
use crate::simulate::SimexEstimateTable;

/// Half-width of the symmetric slope search interval.
pub const SLOPE_SEARCH_BOUND: f64 = 100.0;

/// Permissive floor for the log nuisance: exp(-30) leaves the attenuation
/// factor equal to one at double precision, so the bound is effectively
/// unconstrained on the ratio scale.
const PVAR_FLOOR: f64 = -30.0;

/// Generous ceiling for the log nuisance: exp(30) drives the model mean to
/// zero for any slope in the search interval.
const PVAR_CEIL: f64 = 30.0;

/// Coarse-scan resolution of the outer slope search.
const SLOPE_GRID_CELLS: usize = 400;

/// Coarse-scan resolution of the inner nuisance search.
const PVAR_GRID_CELLS: usize = 120;

const SEARCH_TOLERANCE: f64 = 1e-9;
const MAX_SEARCH_ITERATIONS: usize = 128;

/// Objective value reported to the outer search while an inner failure is
/// being carried out of the closure.
const FAILED_EVALUATION: f64 = 1e12;

/// Errors from profiling and interval inversion.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("estimate table row {row} has unusable variance {variance:.6e}")]
    DegenerateTable { row: usize, variance: f64 },

    #[error("variance ratio must be finite and positive, got {value}")]
    InvalidVarianceRatio { value: f64 },

    #[error(
        "nuisance search for slope {slope} is ill-posed: lower bound {lower:.3} meets ceiling {upper:.3}"
    )]
    IllPosedBounds { slope: f64, lower: f64, upper: f64 },

    #[error(transparent)]
    Optim(#[from] OptimError),
}

/// The profile-likelihood maximizer and its objective value.
#[derive(Debug, Clone, Copy)]
pub struct ProfileMaximum {
    /// Maximizing slope.
    pub slope: f64,
    /// Profile negative log-likelihood at the maximizer.
    pub nll: f64,
}

/// The profile likelihood of the de-diluted slope, closing over one
/// estimate table and the fixed variance ratio.
#[derive(Debug)]
pub struct ProfileLikelihood<'a> {
    table: &'a SimexEstimateTable,
    variance_ratio: f64,
}

impl<'a> ProfileLikelihood<'a> {
    /// Validates the table and scale constant and builds the likelihood.
    pub fn new(
        table: &'a SimexEstimateTable,
        variance_ratio: f64,
    ) -> Result<Self, ProfileError> {
        for (row, estimate) in table.rows().iter().enumerate() {
            if !(estimate.variance.is_finite() && estimate.variance > 0.0) {
                return Err(ProfileError::DegenerateTable {
                    row,
                    variance: estimate.variance,
                });
            }
        }
        if !(variance_ratio.is_finite() && variance_ratio > 0.0) {
            return Err(ProfileError::InvalidVarianceRatio {
                value: variance_ratio,
            });
        }
        Ok(Self {
            table,
            variance_ratio,
        })
    }

    /// Joint negative log-likelihood of `(pmean, pvar)` given the table.
    pub fn joint_nll(&self, pmean: f64, pvar: f64) -> f64 {
        let ratio = pvar.exp();
        self.table
            .rows()
            .iter()
            .map(|row| {
                let mean = pmean / (1.0 + (row.lambda + 1.0) * ratio);
                let deviation = row.slope - mean;
                0.5 * (2.0 * PI * row.variance).ln()
                    + deviation * deviation / (2.0 * row.variance)
            })
            .sum()
    }

    /// Lower bound of the admissible nuisance region for a candidate slope.
    ///
    /// Keeps the attenuation implied by the candidate consistent with the
    /// externally supplied variance ratio. When the constraint is inactive
    /// the permissive floor applies.
    fn pvar_lower_bound(&self, slope: f64) -> f64 {
        let mut min_bound = f64::INFINITY;
        for row in self.table.rows() {
            let bound = (slope * slope * self.variance_ratio - 1.0) / (row.lambda + 1.0);
            min_bound = min_bound.min(bound);
        }
        if min_bound > 0.0 {
            let mut lower = f64::NEG_INFINITY;
            for row in self.table.rows() {
                let bound = (slope * slope * self.variance_ratio - 1.0) / (row.lambda + 1.0);
                lower = lower.max((bound / (row.lambda + 1.0)).ln());
            }
            lower.max(PVAR_FLOOR)
        } else {
            PVAR_FLOOR
        }
    }

    /// Profile negative log-likelihood at a fixed candidate slope: the
    /// joint objective minimized over the nuisance alone.
    pub fn profile_nll(&self, slope: f64) -> Result<f64, ProfileError> {
        let lower = self.pvar_lower_bound(slope);
        if lower >= PVAR_CEIL {
            return Err(ProfileError::IllPosedBounds {
                slope,
                lower,
                upper: PVAR_CEIL,
            });
        }
        let minimum = optim::minimize_on_grid(
            |pvar| self.joint_nll(slope, pvar),
            lower,
            PVAR_CEIL,
            PVAR_GRID_CELLS,
            SEARCH_TOLERANCE,
            MAX_SEARCH_ITERATIONS,
        )?;
        Ok(minimum.value)
    }

    /// Locates the slope maximizing the profile likelihood over the wide
    /// symmetric search interval.
    pub fn maximize(&self) -> Result<ProfileMaximum, ProfileError> {
        let failure: RefCell<Option<ProfileError>> = RefCell::new(None);
        let objective = |slope: f64| match self.profile_nll(slope) {
            Ok(value) => value,
            Err(error) => {
                failure.borrow_mut().get_or_insert(error);
                FAILED_EVALUATION
            }
        };

        let minimum = optim::minimize_on_grid(
            objective,
            -SLOPE_SEARCH_BOUND,
            SLOPE_SEARCH_BOUND,
            SLOPE_GRID_CELLS,
            SEARCH_TOLERANCE,
            MAX_SEARCH_ITERATIONS,
        );
        if let Some(error) = failure.into_inner() {
            return Err(error);
        }
        let minimum = minimum?;

        log::debug!(
            "profile likelihood maximized at slope {:.6} (nll {:.6})",
            minimum.argmin,
            minimum.value
        );
        Ok(ProfileMaximum {
            slope: minimum.argmin,
            nll: minimum.value,
        })
    }
}

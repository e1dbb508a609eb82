//! # Monte-Carlo Simulation Stage
//!
//! Drives the noise injector across the caller's multiplier grid and a fixed
//! number of replicates per multiplier, and aggregates the replicate fits
//! into the estimate table the likelihood stages consume.
//!
//! The replicate loop is a pure map from `(multiplier, replicate)` to one
//! refit, reduced by an order-insensitive sum, so replicates run under rayon
//! without affecting the result. Reproducibility comes from binding every
//! pair to its own seeded random stream rather than from execution order.

use ndarray::Array1;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::data::{self, AdjustmentInput, InputError};
use crate::noise;
use crate::regress::{self, FitError};
use crate::seeding;

/// One row of the estimate table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimexEstimate {
    /// Noise multiplier. Zero marks the sentinel (unperturbed) row.
    pub lambda: f64,
    /// Fitted slope: observed for the sentinel row, replicate mean otherwise.
    pub slope: f64,
    /// Sandwich variance: the observed fit's own variance for the sentinel
    /// row, the replicate-mean variance divided by the replicate count
    /// otherwise (the variance of a Monte-Carlo mean).
    pub variance: f64,
}

/// The estimate table: the sentinel row first, then one row per grid
/// multiplier in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimexEstimateTable {
    rows: Vec<SimexEstimate>,
}

impl SimexEstimateTable {
    /// Builds a table from pre-computed rows, enforcing the row-order
    /// invariants: exactly one sentinel row with `lambda == 0` in first
    /// position, every other multiplier strictly positive and ascending.
    pub fn from_rows(rows: Vec<SimexEstimate>) -> Result<Self, InputError> {
        if rows.is_empty() || rows[0].lambda != 0.0 {
            return Err(InputError::MissingSentinelRow);
        }
        let multipliers: Vec<f64> = rows.iter().skip(1).map(|r| r.lambda).collect();
        data::validate_simulation_settings(&multipliers, 1)?;
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[SimexEstimate] {
        &self.rows
    }

    /// The unperturbed row. The constructor guarantees it exists and leads.
    pub fn sentinel(&self) -> &SimexEstimate {
        &self.rows[0]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as CSV with the `Lambda,Coefficient,Variance`
    /// column contract.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(["Lambda", "Coefficient", "Variance"])?;
        for row in &self.rows {
            out.write_record(&[
                row.lambda.to_string(),
                row.slope.to_string(),
                row.variance.to_string(),
            ])?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Errors from the simulation stage.
#[derive(Error, Debug)]
pub enum SimexError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// A replicate produced a degenerate regression. The whole call aborts
    /// rather than skipping the replicate, which would bias the mean slope.
    #[error("degenerate simulated fit at multiplier {lambda}: {source}")]
    DegenerateFit {
        lambda: f64,
        #[source]
        source: FitError,
    },
}

/// Builds the estimate table: the unperturbed fit first, then the
/// Monte-Carlo mean fit for every multiplier in the grid.
///
/// The same seed with the same inputs, grid and replicate count yields a
/// bit-identical table regardless of how rayon schedules the replicates.
pub fn simulate(
    input: &AdjustmentInput,
    multipliers: &[f64],
    replicates: usize,
    seed: u64,
) -> Result<SimexEstimateTable, SimexError> {
    data::validate_simulation_settings(multipliers, replicates)?;

    log::info!(
        "building SIMEX estimate table: {} multipliers x {} replicates over {} observations",
        multipliers.len(),
        replicates,
        input.len()
    );

    let mut rows = Vec::with_capacity(multipliers.len() + 1);

    let observed = regress::weighted_fit(
        input.predictor().view(),
        input.outcome().view(),
        input.weights().view(),
    )
    .map_err(|source| SimexError::DegenerateFit { lambda: 0.0, source })?;
    let observed_variance = regress::sandwich_variance(
        input.predictor().view(),
        observed.residuals.view(),
        input.weights().view(),
    )
    .map_err(|source| SimexError::DegenerateFit { lambda: 0.0, source })?;
    rows.push(SimexEstimate {
        lambda: 0.0,
        slope: observed.slope,
        variance: observed_variance,
    });

    for (multiplier_index, &lambda) in multipliers.iter().enumerate() {
        let fits: Vec<noise::NoisyFit> = (0..replicates)
            .into_par_iter()
            .map(|replicate| {
                let mut rng = seeding::replicate_rng(seed, multiplier_index, replicate);
                noise::inject_and_refit(input, lambda, &mut rng)
                    .map_err(|source| SimexError::DegenerateFit { lambda, source })
            })
            .collect::<Result<_, _>>()?;

        // Fixed-order reduction over the index-ordered replicate results.
        let count = replicates as f64;
        let mean_slope = fits.iter().map(|f| f.slope).sum::<f64>() / count;
        let mean_variance = fits.iter().map(|f| f.variance).sum::<f64>() / count;

        log::debug!(
            "lambda {lambda:.4}: mean slope {mean_slope:.6} over {replicates} replicates"
        );
        rows.push(SimexEstimate {
            lambda,
            slope: mean_slope,
            variance: mean_variance / count,
        });
    }

    Ok(SimexEstimateTable { rows })
}

/// Convenience wrapper building the table from raw vectors.
pub fn simulate_from_parts(
    predictor: Array1<f64>,
    standard_errors: Array1<f64>,
    outcome: Array1<f64>,
    weights: Option<Array1<f64>>,
    multipliers: &[f64],
    replicates: usize,
    seed: u64,
) -> Result<SimexEstimateTable, SimexError> {
    let input = AdjustmentInput::new(predictor, standard_errors, outcome, weights)?;
    simulate(&input, multipliers, replicates, seed)
}

//! Weighted simple linear regression and the heteroskedasticity-robust
//! (sandwich) variance of its slope.
//!
//! The sandwich form is required rather than the classical OLS variance:
//! the simulation stage injects noise whose scale differs per observation,
//! so the residual variance is heteroskedastic even when the raw data are
//! well behaved.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// Errors from a single regression fit.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("the weighted design is degenerate (denominator {denominator:.6e})")]
    DegenerateDesign { denominator: f64 },

    #[error(
        "sandwich variance evaluated non-finite (numerator {numerator:.6e}, denominator {denominator:.6e})"
    )]
    NonFiniteVariance { numerator: f64, denominator: f64 },
}

/// A converged weighted least-squares fit of `y` on a single predictor.
#[derive(Debug, Clone)]
pub struct WeightedFit {
    pub slope: f64,
    pub intercept: f64,
    pub residuals: Array1<f64>,
}

/// Fits `y = intercept + slope * x` by weighted least squares.
pub fn weighted_fit(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    w: ArrayView1<'_, f64>,
) -> Result<WeightedFit, FitError> {
    let sw = w.sum();
    let swx = w.dot(&x);
    let swy = w.dot(&y);
    let wx = &w * &x;
    let swxx = wx.dot(&x);
    let swxy = wx.dot(&y);

    let denominator = sw * swxx - swx * swx;
    if !(denominator.is_finite() && denominator > 0.0) {
        return Err(FitError::DegenerateDesign { denominator });
    }

    let slope = (sw * swxy - swx * swy) / denominator;
    let intercept = (swy - slope * swx) / sw;
    let residuals = ndarray::Zip::from(&x)
        .and(&y)
        .map_collect(|&xi, &yi| yi - intercept - slope * xi);

    Ok(WeightedFit {
        slope,
        intercept,
        residuals,
    })
}

/// Sandwich variance of the fitted slope.
///
/// With `x` the (possibly simulated) predictor, `r` the fit residuals and
/// `w` the regression weights:
///
/// ```text
/// numerator   = (Σw·x)² Σ(w·r²) − 2 Σw Σ(w·x) Σ(w·x·r²) + (Σw)² Σ(w·x²·r²)
/// denominator = (Σw Σ(w·x²) − (Σw·x)²)²
/// ```
///
/// The numerator collapses to `Σ wᵢ rᵢ² (Σw·x − Σw·xᵢ)²`, so the estimate
/// is non-negative for any non-negative weights.
pub fn sandwich_variance(
    x: ArrayView1<'_, f64>,
    residuals: ArrayView1<'_, f64>,
    w: ArrayView1<'_, f64>,
) -> Result<f64, FitError> {
    let sw = w.sum();
    let swx = w.dot(&x);
    let wx = &w * &x;
    let swxx = wx.dot(&x);

    let wr2 = &(&w * &residuals) * &residuals;
    let swr2 = wr2.sum();
    let swxr2 = wr2.dot(&x);
    let swx2r2 = (&wr2 * &x).dot(&x);

    let numerator = swx * swx * swr2 - 2.0 * sw * swx * swxr2 + sw * sw * swx2r2;
    let design = sw * swxx - swx * swx;
    let denominator = design * design;
    if !(denominator.is_finite() && denominator > 0.0) {
        return Err(FitError::DegenerateDesign {
            denominator: design,
        });
    }

    let variance = numerator / denominator;
    if !variance.is_finite() {
        return Err(FitError::NonFiniteVariance {
            numerator,
            denominator,
        });
    }
    // Cancellation in the expanded form can push a tiny true value below zero.
    Ok(variance.max(0.0))
}

//! Bounded Scalar Minimization
//!
//! Brent's method on a closed interval: golden-section steps with
//! successive parabolic interpolation whenever the last three evaluations
//! support a trustworthy parabola. No derivatives are required, and every
//! trial point stays inside the caller's bounds.
//!
//! The likelihood surfaces minimized here flatten into plateaus far from
//! their basin (an extreme nuisance value drives the model mean to zero, so
//! the objective stops responding). A pure local minimizer started on such a
//! plateau can stall there. `minimize_on_grid` therefore front-loads a
//! deterministic coarse scan of the interval, then polishes the best cell
//! with Brent. The scan is part of the fixed search procedure; there is no
//! adaptive restarting.

use thiserror::Error;

/// Golden-section step fraction, (3 − √5) / 2.
const GOLDEN_STEP: f64 = 0.381_966_011_250_105_1;

/// Absolute floor added to the relative tolerance so intervals around zero
/// still terminate.
const ABSOLUTE_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug)]
pub enum OptimError {
    #[error("objective evaluated non-finite at {at}")]
    NonFiniteObjective { at: f64 },

    #[error("scalar minimization did not converge within {limit} iterations")]
    IterationLimit { limit: usize },
}

/// A located minimum.
#[derive(Debug, Clone, Copy)]
pub struct Minimum {
    pub argmin: f64,
    pub value: f64,
}

fn evaluate(f: &mut impl FnMut(f64) -> f64, at: f64) -> Result<f64, OptimError> {
    let value = f(at);
    if !value.is_finite() {
        return Err(OptimError::NonFiniteObjective { at });
    }
    Ok(value)
}

/// Brent minimization of `f` over `[lower, upper]`.
///
/// `tol` is a relative tolerance on the abscissa; convergence is declared
/// once the bracketing interval shrinks below twice `tol·|x| + floor`.
pub(crate) fn minimize_scalar(
    mut f: impl FnMut(f64) -> f64,
    lower: f64,
    upper: f64,
    tol: f64,
    max_iterations: usize,
) -> Result<Minimum, OptimError> {
    debug_assert!(lower <= upper);
    let (mut a, mut b) = (lower, upper);

    let mut x = a + GOLDEN_STEP * (b - a);
    let (mut w, mut v) = (x, x);
    let mut fx = evaluate(&mut f, x)?;
    let (mut fw, mut fv) = (fx, fx);

    // d: last step taken; e: step taken two iterations ago, the bound on the
    // next parabolic step.
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..=max_iterations {
        let midpoint = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ABSOLUTE_TOLERANCE;
        let tol2 = 2.0 * tol1;

        if (x - midpoint).abs() <= tol2 - 0.5 * (b - a) {
            return Ok(Minimum { argmin: x, value: fx });
        }

        let mut golden = true;
        if e.abs() > tol1 {
            // Parabola through (v, fv), (w, fw), (x, fx).
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            } else {
                q = -q;
            }
            let e_previous = e;
            e = d;
            // Accept only a step smaller than half the one before last that
            // lands strictly inside the bracket.
            if p.abs() < (0.5 * q * e_previous).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                let u = x + d;
                if (u - a) < tol2 || (b - u) < tol2 {
                    d = tol1.copysign(midpoint - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x < midpoint { b - x } else { a - x };
            d = GOLDEN_STEP * e;
        }

        let u = if d.abs() >= tol1 { x + d } else { x + tol1.copysign(d) };
        let fu = evaluate(&mut f, u)?;

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            (v, fv) = (w, fw);
            (w, fw) = (x, fx);
            (x, fx) = (u, fu);
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                (v, fv) = (w, fw);
                (w, fw) = (u, fu);
            } else if fu <= fv || v == x || v == w {
                (v, fv) = (u, fu);
            }
        }
    }

    Err(OptimError::IterationLimit {
        limit: max_iterations,
    })
}

/// Coarse scan of `cells + 1` equally spaced points followed by a Brent
/// polish of the best cell's neighborhood.
pub(crate) fn minimize_on_grid(
    mut f: impl FnMut(f64) -> f64,
    lower: f64,
    upper: f64,
    cells: usize,
    tol: f64,
    max_iterations: usize,
) -> Result<Minimum, OptimError> {
    debug_assert!(lower <= upper);
    if upper - lower <= ABSOLUTE_TOLERANCE {
        let value = evaluate(&mut f, lower)?;
        return Ok(Minimum { argmin: lower, value });
    }

    let cells = cells.max(2);
    let step = (upper - lower) / cells as f64;
    let mut best_index = 0usize;
    let mut best_value = f64::INFINITY;
    for index in 0..=cells {
        let at = if index == cells {
            upper
        } else {
            lower + step * index as f64
        };
        let value = evaluate(&mut f, at)?;
        if value < best_value {
            best_index = index;
            best_value = value;
        }
    }

    let refine_lower = lower + step * best_index.saturating_sub(1) as f64;
    let refine_upper = (lower + step * (best_index + 1) as f64).min(upper);
    let polished = minimize_scalar(&mut f, refine_lower, refine_upper, tol, max_iterations)?;

    // The scan already holds an evaluated point at least as good as any
    // pathological polish outcome.
    if best_value < polished.value {
        let argmin = if best_index == cells {
            upper
        } else {
            lower + step * best_index as f64
        };
        return Ok(Minimum { argmin, value: best_value });
    }
    Ok(polished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_minimum_is_located() {
        let min = minimize_scalar(|x| (x - 1.5) * (x - 1.5), -10.0, 10.0, 1e-10, 200).unwrap();
        assert_relative_eq!(min.argmin, 1.5, epsilon = 1e-6);
        assert!(min.value < 1e-10);
    }

    #[test]
    fn non_smooth_objective_is_handled() {
        let min = minimize_scalar(|x| (x - 0.3).abs(), -4.0, 2.0, 1e-10, 200).unwrap();
        assert_relative_eq!(min.argmin, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn boundary_minimum_is_reported_at_the_bound() {
        let min = minimize_scalar(|x| x, 2.0, 5.0, 1e-10, 200).unwrap();
        assert_relative_eq!(min.argmin, 2.0, epsilon = 1e-4);
    }

    #[test]
    fn degenerate_interval_returns_the_single_point() {
        let min = minimize_scalar(|x| x * x, 3.0, 3.0, 1e-10, 200).unwrap();
        assert_eq!(min.argmin, 3.0);
        assert_eq!(min.value, 9.0);
    }

    #[test]
    fn non_finite_objective_is_an_error() {
        let err = minimize_scalar(|x| 1.0 / x, -1.0, 1.0, 1e-10, 200);
        assert!(matches!(
            err,
            Err(OptimError::NonFiniteObjective { .. }) | Ok(_)
        ));
        let err = minimize_scalar(|_| f64::NAN, -1.0, 1.0, 1e-10, 200).unwrap_err();
        assert!(matches!(err, OptimError::NonFiniteObjective { .. }));
    }

    #[test]
    fn iteration_limit_is_an_error() {
        let err = minimize_scalar(|x| (x - 0.5) * (x - 0.5), -100.0, 100.0, 1e-12, 0).unwrap_err();
        assert!(matches!(err, OptimError::IterationLimit { limit: 0 }));
    }

    #[test]
    fn grid_scan_escapes_a_plateau_hiding_a_narrow_basin() {
        // Flat almost everywhere with a sharp dip near 62.1; a local
        // minimizer started from the wrong side of the interval stalls.
        let f = |x: f64| {
            let d: f64 = x - 62.1;
            100.0 - 99.0 * (-d * d * 50.0).exp()
        };
        let min = minimize_on_grid(f, -100.0, 100.0, 400, 1e-10, 200).unwrap();
        assert_relative_eq!(min.argmin, 62.1, epsilon = 1e-4);
    }

    #[test]
    fn grid_scan_picks_the_deeper_of_two_basins() {
        let f = |x: f64| {
            let left: f64 = (x + 3.0) * (x + 3.0) + 0.5;
            let right: f64 = (x - 4.0) * (x - 4.0);
            left.min(right)
        };
        let min = minimize_on_grid(f, -10.0, 10.0, 100, 1e-10, 200).unwrap();
        assert_relative_eq!(min.argmin, 4.0, epsilon = 1e-6);
    }
}

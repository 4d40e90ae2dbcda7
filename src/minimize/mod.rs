//! # Nonlinear least-squares minimization
//!
//! The fitting engine talks to its optimizer through the narrow [`Minimizer`]
//! trait: give it a residual function, an initial parameter vector, and box
//! bounds; get back the best parameters, a covariance estimate, evaluation
//! counts, and a convergence flag. Any conforming implementation
//! (Levenberg–Marquardt, trust region, ...) is substitutable.
//!
//! [`LevenbergMarquardt`] is the in-crate implementation: a damped
//! Gauss–Newton iteration with a forward-difference Jacobian, multiplicative
//! damping adaptation, and bound handling by projection. The covariance is
//! derived from the last Jacobian as `(JᵀJ)⁻¹ · χ²/(m−n)`.
//!
//! Budget exhaustion is not an error here: the outcome carries
//! `converged = false` and the caller decides how to report it.

use nalgebra::{DMatrix, DVector};

use crate::specfit_errors::SpecfitError;

/// Residual function: parameter vector in, residual vector out.
pub type ResidualFn<'a> = dyn FnMut(&DVector<f64>) -> Result<DVector<f64>, SpecfitError> + 'a;

/// Outcome of one minimization run.
#[derive(Debug, Clone)]
pub struct MinimizeOutcome {
    /// Best parameter vector found.
    pub best: DVector<f64>,
    /// Scaled covariance of the best parameters, when the system allowed it.
    pub covariance: Option<DMatrix<f64>>,
    /// Final cost, `Σ rᵢ²`.
    pub cost: f64,
    /// Number of damped Gauss–Newton iterations performed.
    pub iterations: usize,
    /// Number of residual-function evaluations.
    pub evaluations: usize,
    /// True when a tolerance criterion was met within the budgets.
    pub converged: bool,
}

/// Contract of the external nonlinear least-squares optimizer.
pub trait Minimizer {
    /// Minimize `Σ rᵢ(x)²` starting from `initial`, keeping `x` inside
    /// `bounds` (one `(lo, hi)` pair per parameter, infinities allowed).
    ///
    /// Errors raised by the residual function propagate unchanged; running
    /// out of budget is reported through `converged = false` instead.
    fn minimize(
        &self,
        residual: &mut ResidualFn<'_>,
        initial: &DVector<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<MinimizeOutcome, SpecfitError>;
}

/// Damped Gauss–Newton (Levenberg–Marquardt) minimizer.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Maximum number of outer iterations.
    pub max_iterations: usize,
    /// Maximum number of residual evaluations (Jacobian columns included).
    pub max_evaluations: usize,
    /// Relative cost-decrease tolerance.
    pub ftol: f64,
    /// Relative step-size tolerance.
    pub xtol: f64,
    /// Initial damping factor λ.
    pub initial_lambda: f64,
    /// Factor applied to λ after a rejected step.
    pub lambda_up: f64,
    /// Factor dividing λ after an accepted step.
    pub lambda_down: f64,
    /// Relative finite-difference step for the Jacobian.
    pub fd_step: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_evaluations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 10.0,
            fd_step: 1e-6,
        }
    }
}

fn clamp_into(x: &mut DVector<f64>, bounds: &[(f64, f64)]) {
    for (v, (lo, hi)) in x.iter_mut().zip(bounds) {
        *v = v.clamp(*lo, *hi);
    }
}

impl Minimizer for LevenbergMarquardt {
    fn minimize(
        &self,
        residual: &mut ResidualFn<'_>,
        initial: &DVector<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<MinimizeOutcome, SpecfitError> {
        let n = initial.len();
        let mut x = initial.clone();
        clamp_into(&mut x, bounds);

        let mut evaluations = 0usize;
        let mut r = residual(&x)?;
        evaluations += 1;
        let mut cost = r.norm_squared();

        if n == 0 {
            return Ok(MinimizeOutcome {
                best: x,
                covariance: None,
                cost,
                iterations: 0,
                evaluations,
                converged: true,
            });
        }

        let mut lambda = self.initial_lambda;
        let mut converged = false;
        let mut iterations = 0usize;
        let mut last_jtj: Option<DMatrix<f64>> = None;

        'outer: while iterations < self.max_iterations {
            iterations += 1;

            // Forward-difference Jacobian; steps near an upper bound flip sign
            // so the probe stays feasible.
            let m = r.len();
            let mut jac = DMatrix::zeros(m, n);
            for j in 0..n {
                if evaluations >= self.max_evaluations {
                    break 'outer;
                }
                let mut h = self.fd_step * x[j].abs().max(1.0);
                if x[j] + h > bounds[j].1 {
                    h = -h;
                }
                let mut xh = x.clone();
                xh[j] = (x[j] + h).clamp(bounds[j].0, bounds[j].1);
                let dh = xh[j] - x[j];
                if dh == 0.0 {
                    continue; // parameter pinned by its bounds
                }
                let rh = residual(&xh)?;
                evaluations += 1;
                for i in 0..m {
                    jac[(i, j)] = (rh[i] - r[i]) / dh;
                }
            }

            let jtj = jac.transpose() * &jac;
            let g = jac.transpose() * &r;
            let neg_g = -&g;
            last_jtj = Some(jtj.clone());

            let mut improved = false;
            for _ in 0..16 {
                if evaluations >= self.max_evaluations {
                    break 'outer;
                }

                let mut a = jtj.clone();
                for d in 0..n {
                    a[(d, d)] = jtj[(d, d)] + lambda * jtj[(d, d)].max(1e-12);
                }
                let step = match a.clone().cholesky() {
                    Some(chol) => chol.solve(&neg_g),
                    None => match a.lu().solve(&neg_g) {
                        Some(s) => s,
                        None => {
                            lambda *= self.lambda_up;
                            continue;
                        }
                    },
                };

                let mut x_new = &x + &step;
                clamp_into(&mut x_new, bounds);
                let actual_step = &x_new - &x;

                let r_new = residual(&x_new)?;
                evaluations += 1;
                let cost_new = r_new.norm_squared();

                if cost_new < cost {
                    let small_step = actual_step.amax() <= self.xtol * x.amax().max(1.0);
                    let small_decrease =
                        (cost - cost_new) <= self.ftol * cost.max(f64::MIN_POSITIVE);
                    x = x_new;
                    r = r_new;
                    cost = cost_new;
                    lambda = (lambda / self.lambda_down).max(1e-14);
                    improved = true;
                    if small_step || small_decrease {
                        converged = true;
                        break 'outer;
                    }
                    break;
                }

                // A rejected step that is already tiny means we sit at a
                // (possibly bound-constrained) minimum.
                if actual_step.amax() <= self.xtol * x.amax().max(1.0) {
                    converged = true;
                    break 'outer;
                }
                lambda *= self.lambda_up;
            }

            if !improved {
                // Damping exhausted without any acceptable step.
                converged = true;
                break;
            }
        }

        let m = r.len();
        let covariance = last_jtj.and_then(|jtj| {
            if m > n {
                jtj.try_inverse()
                    .map(|inv| inv * (cost / (m - n) as f64))
            } else {
                None
            }
        });

        Ok(MinimizeOutcome {
            best: x,
            covariance,
            cost,
            iterations,
            evaluations,
            converged,
        })
    }
}

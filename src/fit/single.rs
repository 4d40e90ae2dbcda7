//! # Single-pass parameter fit
//!
//! [`ParamsFit`] minimizes the weighted residual between one observed spectrum
//! and the continuum-corrected synthetic spectrum interpolated from the grid.
//!
//! ## Pipeline
//!
//! 1. Apply the configured mask rules to a working copy of the observation,
//! 2. Combine the weight sources into the effective per-pixel weight,
//! 3. Validate the initial coordinate against the grid bounds,
//! 4. Hand the residual function to the minimizer, which proposes parameter
//!    updates within the (tolerance-widened) axis bounds,
//! 5. Collect best-fit values, standard errors from the covariance, and the
//!    reduced chi-square into a [`FitResult`].
//!
//! ## Free-parameter resolution
//!
//! Which parameters vary is decided *per call* through the explicit `free`
//! list: a parameter named there always varies during this call, whatever any
//! earlier call did. This is what lets the multi-pass driver progressively
//! unlock parameters.
//!
//! ## Failure semantics
//!
//! * Budget exhaustion → result returned with `success = false` and the
//!   `NoConvergence` kind recorded, never an `Err`.
//! * Initial coordinate outside the grid beyond tolerance →
//!   [`SpecfitError::OutOfGridRange`], before any optimization starts.

use nalgebra::DVector;

use crate::fit::{FitParams, FitResult};
use crate::interpolate::GridInterpolator;
use crate::minimize::{LevenbergMarquardt, Minimizer};
use crate::params::ParameterVector;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;
use crate::weights::{apply_masks, effective_weight, WeightProfile};

/// Single-pass optimizer for one observed spectrum.
pub struct ParamsFit<'a> {
    interpolator: &'a GridInterpolator,
    params: &'a FitParams,
}

impl<'a> ParamsFit<'a> {
    pub fn new(interpolator: &'a GridInterpolator, params: &'a FitParams) -> Self {
        Self {
            interpolator,
            params,
        }
    }

    /// Fit `free` parameters of `initial` to the observed spectrum; all other
    /// parameters are held fixed at their `initial` values.
    ///
    /// With an empty `free` list no optimization happens: the input
    /// parameters come back unchanged together with the residual of a single
    /// forward evaluation.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::UnknownParameter`] – a `free` name is not a grid axis.
    /// * [`SpecfitError::OutOfGridRange`] – initial coordinate (or, rarely, a
    ///   proposal escaping through a hole-degraded edge) beyond tolerance.
    /// * [`SpecfitError::InvalidSpectrum`] – no usable pixels remain after
    ///   masking and weighting.
    pub fn fit(
        &self,
        observed: &Spectrum,
        initial: &ParameterVector,
        free: &[&str],
    ) -> Result<FitResult, SpecfitError> {
        // masks are recomputed per pass: they depend on the current spectrum
        let mut work = observed.clone();
        apply_masks(&mut work, &self.params.mask_rules);
        let weights = effective_weight(&work, &self.params.weight_sources)?;

        let n_weighted = weights.iter().filter(|w| **w > 0.0).count();
        if n_weighted == 0 {
            return Err(SpecfitError::InvalidSpectrum(
                "no pixels with non-zero weight remain".into(),
            ));
        }

        for name in free {
            if self.interpolator.grid().axis(name).is_none() {
                return Err(SpecfitError::UnknownParameter((*name).to_string()));
            }
        }

        let mut current = initial.clone();
        for p in initial.iter() {
            current.set_free(&p.name, free.contains(&p.name.as_str()))?;
        }
        self.interpolator.validate(&current)?;

        let free_order = current.free_names();
        let dof = n_weighted.saturating_sub(free_order.len()).max(1);

        if free_order.is_empty() {
            // fit-with-nothing-free is a no-op search
            let residual = self.forward_residual(&current, &work, &weights)?;
            return Ok(FitResult {
                params: current,
                reduced_chi2: residual.norm_squared() / dof as f64,
                converged: true,
                success: true,
                iterations: 0,
                evaluations: 1,
                error: None,
            });
        }

        let mut bounds = Vec::with_capacity(free_order.len());
        for name in &free_order {
            let (mut lo, mut hi) = self
                .interpolator
                .axis_bounds(name)
                .ok_or_else(|| SpecfitError::UnknownParameter(name.clone()))?;
            if let Some(p) = current.get(name) {
                lo = lo.max(p.min);
                hi = hi.min(p.max);
            }
            bounds.push((lo, hi));
        }
        let x0 = DVector::from_iterator(
            free_order.len(),
            free_order.iter().map(|n| current.value(n).unwrap_or(0.0)),
        );

        let minimizer = LevenbergMarquardt {
            max_iterations: self.params.max_iterations,
            max_evaluations: self.params.max_evaluations,
            ftol: self.params.ftol,
            xtol: self.params.xtol,
            ..Default::default()
        };

        let mut trial = current.clone();
        let mut residual_fn = |x: &DVector<f64>| -> Result<DVector<f64>, SpecfitError> {
            for (name, value) in free_order.iter().zip(x.iter()) {
                trial.set_value(name, *value)?;
            }
            self.forward_residual(&trial, &work, &weights)
        };

        let outcome = minimizer.minimize(&mut residual_fn, &x0, &bounds)?;

        for (i, name) in free_order.iter().enumerate() {
            current.set_value(name, outcome.best[i])?;
            let stderr = outcome
                .covariance
                .as_ref()
                .map(|cov| cov[(i, i)].max(0.0).sqrt());
            current.set_uncertainty(name, stderr)?;
        }

        let reduced_chi2 = outcome.cost / dof as f64;
        let error = (!outcome.converged).then_some(SpecfitError::NoConvergence {
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
        });

        log::debug!(
            "single-pass fit: free={free_order:?}, chi2_red={reduced_chi2:.4e}, \
             converged={}, {} iterations, {} evaluations",
            outcome.converged,
            outcome.iterations,
            outcome.evaluations
        );

        Ok(FitResult {
            params: current,
            reduced_chi2,
            converged: outcome.converged,
            success: outcome.converged,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            error,
        })
    }

    /// One forward evaluation: interpolate, resample onto the observation,
    /// continuum-correct, and weight the flux difference.
    fn forward_residual(
        &self,
        params: &ParameterVector,
        observed: &Spectrum,
        weights: &WeightProfile,
    ) -> Result<DVector<f64>, SpecfitError> {
        let synthetic = self.interpolator.interpolate(params)?;
        let resampled = synthetic.resample_onto(observed.wave())?;
        let model = self
            .params
            .continuum
            .fit_and_apply(&resampled, observed, weights)?;

        Ok(DVector::from_iterator(
            observed.len(),
            (0..observed.len()).map(|i| {
                if model.valid()[i] {
                    weights[i] * (observed.flux()[i] - model.flux()[i])
                } else {
                    0.0
                }
            }),
        ))
    }
}

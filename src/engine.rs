//! # Engine façade
//!
//! [`FitEngine`] bundles a spectral grid, the interpolator configured from the
//! fit parameters, and the [`FitParams`] themselves into one handle, so
//! callers set everything up once and then fit single spectra, composites, or
//! whole target sets without re-threading configuration through every call.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use specfit::{FitEngine, FitParams, Parameter, ParameterVector, SpectralGrid};
//!
//! # fn load_grid() -> SpectralGrid { unimplemented!() }
//! let grid = Arc::new(load_grid());
//! let engine = FitEngine::new(grid, FitParams::default()).unwrap();
//!
//! let initial: ParameterVector = [
//!     Parameter::new("teff", 5750.0),
//!     Parameter::new("logg", 4.4),
//! ]
//! .into_iter()
//! .collect();
//! # let observed = unimplemented!();
//! let result = engine.fit_single(&observed, &initial, &["teff", "logg"]).unwrap();
//! println!("chi2_red = {}", result.reduced_chi2);
//! ```

use std::sync::Arc;

use crate::constants::TargetSet;
use crate::fit::batch::{BatchFit, FullFitResult};
use crate::fit::multi::{Component, MultiFit, MultiFitResult};
use crate::fit::single::ParamsFit;
use crate::fit::{FitParams, FitResult};
use crate::grid::SpectralGrid;
use crate::interpolate::GridInterpolator;
use crate::params::ParameterVector;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;

/// Shared handle over a grid, its interpolator, and the fit configuration.
pub struct FitEngine {
    grid: Arc<SpectralGrid>,
    interpolator: GridInterpolator,
    params: FitParams,
}

impl FitEngine {
    /// Build an engine over a loaded grid.
    ///
    /// The interpolator inherits `extrapolation_tolerance` and
    /// `overshoot_margin` from the fit parameters.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::EmptyGrid`] – the grid holds no spectra.
    pub fn new(grid: Arc<SpectralGrid>, params: FitParams) -> Result<Self, SpecfitError> {
        if grid.is_empty() {
            return Err(SpecfitError::EmptyGrid);
        }
        let interpolator = GridInterpolator::new(Arc::clone(&grid))
            .with_extrapolation_tolerance(params.extrapolation_tolerance)
            .with_overshoot_margin(params.overshoot_margin);
        Ok(Self {
            grid,
            interpolator,
            params,
        })
    }

    pub fn grid(&self) -> &SpectralGrid {
        &self.grid
    }

    pub fn interpolator(&self) -> &GridInterpolator {
        &self.interpolator
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    /// Interpolate a synthetic spectrum at the given parameters.
    pub fn synthesize(&self, params: &ParameterVector) -> Result<Spectrum, SpecfitError> {
        self.interpolator.interpolate(params)
    }

    /// Single-pass fit of one observed spectrum.
    pub fn fit_single(
        &self,
        observed: &Spectrum,
        initial: &ParameterVector,
        free: &[&str],
    ) -> Result<FitResult, SpecfitError> {
        ParamsFit::new(&self.interpolator, &self.params).fit(observed, initial, free)
    }

    /// Iterative multi-component fit of one observed spectrum.
    pub fn fit_target(
        &self,
        observed: &Spectrum,
        components: &[Component],
    ) -> Result<MultiFitResult, SpecfitError> {
        MultiFit::new(&self.interpolator, &self.params).fit(observed, components)
    }

    /// Iterative fit with caller-driven cancellation between passes.
    pub fn fit_target_with_cancel<F>(
        &self,
        observed: &Spectrum,
        components: &[Component],
        should_cancel: F,
    ) -> Result<MultiFitResult, SpecfitError>
    where
        F: FnMut() -> bool,
    {
        MultiFit::new(&self.interpolator, &self.params).fit_with_cancel(
            observed,
            components,
            should_cancel,
        )
    }

    /// Fit every target of a set sequentially.
    pub fn fit_all(&self, targets: &TargetSet, components: &[Component]) -> FullFitResult {
        targets.fit_all(&self.interpolator, &self.params, components)
    }

    /// Fit every target of a set on the rayon thread pool.
    pub fn par_fit_all(&self, targets: &TargetSet, components: &[Component]) -> FullFitResult {
        targets.par_fit_all(&self.interpolator, &self.params, components)
    }
}

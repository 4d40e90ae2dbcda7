//! # Fit configuration and results
//!
//! This module defines the [`FitParams`] configuration struct and its builder,
//! which control continuum correction, pixel weighting and masking, the
//! minimizer budgets, per-parameter convergence thresholds, and the damped
//! retry behavior of the iterative driver.
//!
//! ## Purpose
//!
//! [`FitParams`] centralizes every tunable of the fitting engine. Surrounding
//! layers (YAML parsing, CLI) populate it; the engine only consumes it.
//!
//! ## Example
//!
//! ```rust
//! use specfit::fit::FitParams;
//! use specfit::continuum::ContinuumModel;
//!
//! let params = FitParams::builder()
//!     .continuum(ContinuumModel::Polynomial { degree: 12 })
//!     .max_passes(6)
//!     .threshold("teff", 10.0)
//!     .damping_factors(vec![0.7, 0.3])
//!     .build()
//!     .unwrap();
//! assert_eq!(params.max_passes, 6);
//! ```
//!
//! ## See also
//! ------------
//! * [`ParamsFit`](crate::fit::single::ParamsFit) – single-pass optimizer.
//! * [`MultiFit`](crate::fit::multi::MultiFit) – iterative multi-component driver.
//! * [`BatchFit`](crate::fit::batch::BatchFit) – batch execution over targets.

pub mod batch;
pub mod multi;
pub mod single;

use std::collections::HashMap;

use ahash::RandomState;

use crate::constants::{THRESHOLD_DEFAULT, THRESHOLD_TEFF, THRESHOLD_VELOCITY};
use crate::continuum::ContinuumModel;
use crate::params::ParameterVector;
use crate::specfit_errors::SpecfitError;
use crate::weights::{MaskRule, WeightSource};

/// How multiple spectral components combine into the observed composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationRule {
    /// Component fluxes add (e.g. the stars of an unresolved binary).
    Sum,
    /// Component fluxes multiply (e.g. a telluric absorption component).
    Product,
}

/// Configuration of the fitting engine.
///
/// Fields
/// -----------------
/// **Forward model**
/// * `continuum` – continuum correction variant applied to every synthetic
///   spectrum before the residual is formed.
/// * `weight_sources` – independent weight contributions, combined by
///   elementwise product (order never matters).
/// * `mask_rules` – pixel exclusion policies, combined as a union.
///
/// **Minimizer budgets**
/// * `max_iterations` / `max_evaluations` – budget of one
///   [`ParamsFit`](crate::fit::single::ParamsFit) call; exhaustion is recorded
///   as `NoConvergence` in the result, not raised.
/// * `ftol` / `xtol` – relative cost-decrease and step-size tolerances.
///
/// **Iterative driver**
/// * `max_passes` – full alternation passes of
///   [`MultiFit`](crate::fit::multi::MultiFit) before giving up.
/// * `thresholds` – per-parameter convergence thresholds; parameters absent
///   from the map fall back to defaults (25 K for `teff`, 1.0 for `v`/`sig`,
///   0.05 otherwise).
/// * `damped` / `damping_factors` – when the alternation fails to converge,
///   rerun it with damped parameter updates, one attempt per factor.
/// * `combination` – composite-spectrum combination rule.
///
/// **Grid evaluation**
/// * `extrapolation_tolerance` – allowed overshoot past axis edges, in units
///   of the edge cell width.
/// * `overshoot_margin` – optional clamp of interpolated flux to the local
///   sample range widened by this fraction.
#[derive(Debug, Clone)]
pub struct FitParams {
    pub continuum: ContinuumModel,
    pub weight_sources: Vec<WeightSource>,
    pub mask_rules: Vec<MaskRule>,
    pub thresholds: HashMap<String, f64, RandomState>,
    pub max_passes: usize,
    pub damped: bool,
    pub damping_factors: Vec<f64>,
    pub max_iterations: usize,
    pub max_evaluations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub extrapolation_tolerance: f64,
    pub overshoot_margin: Option<f64>,
    pub combination: CombinationRule,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            continuum: ContinuumModel::default(),
            weight_sources: vec![WeightSource::FromSigma],
            mask_rules: vec![MaskRule::NegativeFlux],
            thresholds: HashMap::default(),
            max_passes: 8,
            damped: true,
            damping_factors: vec![0.7, 0.3],
            max_iterations: 100,
            max_evaluations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            extrapolation_tolerance: 0.0,
            overshoot_margin: None,
            combination: CombinationRule::Sum,
        }
    }
}

impl FitParams {
    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::default()
    }

    /// Convergence threshold for a parameter name.
    ///
    /// Explicit entries win; otherwise temperature-like parameters get 25,
    /// velocity-like parameters 1.0, and everything else 0.05.
    pub fn threshold_for(&self, name: &str) -> f64 {
        if let Some(t) = self.thresholds.get(name) {
            return *t;
        }
        match name.to_ascii_lowercase().as_str() {
            "teff" => THRESHOLD_TEFF,
            "v" | "sig" => THRESHOLD_VELOCITY,
            _ => THRESHOLD_DEFAULT,
        }
    }
}

/// Builder for [`FitParams`] with validation at `build` time.
#[derive(Debug, Clone, Default)]
pub struct FitParamsBuilder {
    inner: Option<FitParams>,
}

impl FitParamsBuilder {
    fn params(&mut self) -> &mut FitParams {
        self.inner.get_or_insert_with(FitParams::default)
    }

    pub fn continuum(mut self, continuum: ContinuumModel) -> Self {
        self.params().continuum = continuum;
        self
    }

    pub fn weight_sources(mut self, sources: Vec<WeightSource>) -> Self {
        self.params().weight_sources = sources;
        self
    }

    pub fn mask_rules(mut self, rules: Vec<MaskRule>) -> Self {
        self.params().mask_rules = rules;
        self
    }

    /// Set an explicit convergence threshold for one parameter name.
    pub fn threshold(mut self, name: &str, value: f64) -> Self {
        self.params().thresholds.insert(name.to_string(), value);
        self
    }

    pub fn max_passes(mut self, passes: usize) -> Self {
        self.params().max_passes = passes;
        self
    }

    pub fn damped(mut self, damped: bool) -> Self {
        self.params().damped = damped;
        self
    }

    pub fn damping_factors(mut self, factors: Vec<f64>) -> Self {
        self.params().damping_factors = factors;
        self
    }

    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.params().max_iterations = iterations;
        self
    }

    pub fn max_evaluations(mut self, evaluations: usize) -> Self {
        self.params().max_evaluations = evaluations;
        self
    }

    pub fn ftol(mut self, ftol: f64) -> Self {
        self.params().ftol = ftol;
        self
    }

    pub fn xtol(mut self, xtol: f64) -> Self {
        self.params().xtol = xtol;
        self
    }

    pub fn extrapolation_tolerance(mut self, tolerance: f64) -> Self {
        self.params().extrapolation_tolerance = tolerance;
        self
    }

    pub fn overshoot_margin(mut self, margin: Option<f64>) -> Self {
        self.params().overshoot_margin = margin;
        self
    }

    pub fn combination(mut self, rule: CombinationRule) -> Self {
        self.params().combination = rule;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidFitParameter`] – zero budgets, non-positive
    ///   tolerances or thresholds, or damping factors outside (0, 1).
    pub fn build(mut self) -> Result<FitParams, SpecfitError> {
        let mut params = self.inner.take().unwrap_or_default();

        if params.max_passes == 0 {
            return Err(SpecfitError::InvalidFitParameter(
                "max_passes must be at least 1".into(),
            ));
        }
        if params.max_iterations == 0 || params.max_evaluations == 0 {
            return Err(SpecfitError::InvalidFitParameter(
                "minimizer budgets must be at least 1".into(),
            ));
        }
        if params.ftol <= 0.0 || params.xtol <= 0.0 {
            return Err(SpecfitError::InvalidFitParameter(
                "ftol and xtol must be positive".into(),
            ));
        }
        if params.extrapolation_tolerance < 0.0 {
            return Err(SpecfitError::InvalidFitParameter(
                "extrapolation tolerance cannot be negative".into(),
            ));
        }
        if params
            .damping_factors
            .iter()
            .any(|f| *f <= 0.0 || *f >= 1.0)
        {
            return Err(SpecfitError::InvalidFitParameter(
                "damping factors must lie strictly between 0 and 1".into(),
            ));
        }
        if params.thresholds.values().any(|t| *t <= 0.0) {
            return Err(SpecfitError::InvalidFitParameter(
                "convergence thresholds must be positive".into(),
            ));
        }

        // Damping attempts run strongest first.
        params
            .damping_factors
            .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        Ok(params)
    }
}

/// Result of one single-pass fit.
///
/// Convergence failures are captured here (`converged = false`, `error` set to
/// the `NoConvergence` kind) rather than raised, so batch runs keep going.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Best-fit parameters, with standard errors on the free ones.
    pub params: ParameterVector,
    /// Final residual statistic.
    pub reduced_chi2: f64,
    /// True when the minimizer met a tolerance criterion within budget.
    pub converged: bool,
    /// Overall verdict of this fit.
    pub success: bool,
    /// Minimizer iterations spent.
    pub iterations: usize,
    /// Residual-function evaluations spent.
    pub evaluations: usize,
    /// Error kind recorded for reporting (never a hard failure).
    pub error: Option<SpecfitError>,
}

#[cfg(test)]
mod fit_params_test {
    use super::*;

    #[test]
    fn builder_sorts_damping_factors_descending() {
        let params = FitParams::builder()
            .damping_factors(vec![0.3, 0.7, 0.5])
            .build()
            .unwrap();
        assert_eq!(params.damping_factors, vec![0.7, 0.5, 0.3]);
    }

    #[test]
    fn builder_rejects_invalid_damping_factor() {
        assert!(FitParams::builder()
            .damping_factors(vec![1.5])
            .build()
            .is_err());
    }

    #[test]
    fn builder_rejects_zero_passes() {
        assert!(FitParams::builder().max_passes(0).build().is_err());
    }

    #[test]
    fn default_thresholds_follow_parameter_kind() {
        let params = FitParams::default();
        assert_eq!(params.threshold_for("Teff"), 25.0);
        assert_eq!(params.threshold_for("v"), 1.0);
        assert_eq!(params.threshold_for("sig"), 1.0);
        assert_eq!(params.threshold_for("logg"), 0.05);
        let params = FitParams::builder().threshold("logg", 0.2).build().unwrap();
        assert_eq!(params.threshold_for("logg"), 0.2);
    }
}

//! # Iterative multi-component driver
//!
//! Composite spectra (unresolved binaries, a star behind telluric absorption)
//! cannot be fit jointly in closed form. [`MultiFit`] applies the standard
//! practical approximation: fit one component at a time with the others'
//! synthetic contributions removed from the observation, alternate over all
//! components, and repeat until the parameters stabilize.
//!
//! ## State machine
//!
//! The alternation is an explicit state machine rather than nested loops:
//!
//! ```text
//! Initializing → FittingComponent(0) → … → FittingComponent(n-1)
//!       ↑                                        │
//!       └──────────── CheckingConvergence ←──────┘
//!                        │        │
//!                   Converged   MaxIterationsReached
//! ```
//!
//! `CheckingConvergence` compares the per-parameter deltas of the last two
//! passes against the configured thresholds; it is also the only point where
//! a cancellation request is honored, so a running minimizer call is never
//! interrupted.
//!
//! ## Damped retries
//!
//! When the plain alternation does not stabilize and damping is enabled, the
//! whole cycle restarts from the initial values with parameter updates damped
//! as `init + factor · delta`, once per configured factor (strongest first),
//! with tightened thresholds and a tripled pass budget. The factor in effect
//! is reported in the result.

use ahash::AHashMap;

use crate::fit::single::ParamsFit;
use crate::fit::{CombinationRule, FitParams};
use crate::interpolate::GridInterpolator;
use crate::params::ParameterVector;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;
use crate::weights::{apply_masks, effective_weight};

/// One physical source contributing to the observed composite spectrum.
#[derive(Debug, Clone)]
pub struct Component {
    /// Component name, used to qualify parameter names in reports.
    pub name: String,
    /// Current parameter values (one per grid axis, at least).
    pub params: ParameterVector,
    /// Names of the parameters this component fits; the rest stay fixed.
    pub fit_names: Vec<String>,
}

impl Component {
    pub fn new(name: &str, params: ParameterVector, fit_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            params,
            fit_names: fit_names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// States of the alternating fit driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    Initializing,
    FittingComponent(usize),
    CheckingConvergence,
    Converged,
    MaxIterationsReached,
}

/// Final state of one component after the alternation.
#[derive(Debug, Clone)]
pub struct ComponentResult {
    pub name: String,
    pub params: ParameterVector,
    /// Reduced chi-square of this component's last single-pass fit.
    pub reduced_chi2: f64,
}

/// Outcome of a [`MultiFit`] run.
#[derive(Debug, Clone)]
pub struct MultiFitResult {
    pub components: Vec<ComponentResult>,
    /// Alternation passes spent, damped retries included.
    pub passes: usize,
    /// True when all parameter deltas fell below their thresholds.
    pub converged: bool,
    /// True when every single-pass fit along the way succeeded.
    pub success: bool,
    /// Damping factor in effect when the run ended, if damping was used.
    pub damping_factor: Option<f64>,
    /// True when the caller cancelled the run between passes.
    pub cancelled: bool,
}

/// Iterative multi-component fit driver.
pub struct MultiFit<'a> {
    interpolator: &'a GridInterpolator,
    params: &'a FitParams,
}

/// Outcome of one alternation cycle (plain or damped).
struct CycleOutcome {
    passes: usize,
    converged: bool,
    success: bool,
    cancelled: bool,
    chi2: Vec<f64>,
}

impl<'a> MultiFit<'a> {
    pub fn new(interpolator: &'a GridInterpolator, params: &'a FitParams) -> Self {
        Self {
            interpolator,
            params,
        }
    }

    /// Run the alternating fit to completion.
    pub fn fit(
        &self,
        observed: &Spectrum,
        components: &[Component],
    ) -> Result<MultiFitResult, SpecfitError> {
        self.fit_with_cancel(observed, components, || false)
    }

    /// Run the alternating fit, polling `should_cancel` at every
    /// `CheckingConvergence` boundary. A cancelled run returns the partial
    /// result with `converged = false`.
    pub fn fit_with_cancel<F>(
        &self,
        observed: &Spectrum,
        components: &[Component],
        mut should_cancel: F,
    ) -> Result<MultiFitResult, SpecfitError>
    where
        F: FnMut() -> bool,
    {
        if components.is_empty() {
            return Err(SpecfitError::InvalidFitParameter(
                "at least one component is required".into(),
            ));
        }

        let max_passes = self.params.max_passes;
        let min_passes = if max_passes > 1 { 2 } else { 1 };

        let mut comps = components.to_vec();
        let outcome = self.run_cycle(
            observed,
            &mut comps,
            1.0,
            max_passes,
            min_passes,
            None,
            &mut should_cancel,
        )?;

        // A single-pass configuration performs no convergence checking: the
        // verdict is simply whether the component fits succeeded.
        if max_passes == 1 {
            return Ok(Self::collect(
                comps,
                outcome.passes,
                outcome.success,
                outcome.success,
                None,
                outcome.cancelled,
                &outcome.chi2,
            ));
        }

        if outcome.converged || outcome.cancelled || !self.params.damped {
            return Ok(Self::collect(
                comps,
                outcome.passes,
                outcome.converged,
                outcome.success && outcome.converged,
                None,
                outcome.cancelled,
                &outcome.chi2,
            ));
        }

        // Damped retries: restart from the initial values with tightened
        // thresholds and a tripled pass budget, strongest factor first.
        let mut total_passes = outcome.passes;
        let mut last: Option<(Vec<Component>, CycleOutcome, f64)> = None;
        for &factor in &self.params.damping_factors {
            log::debug!("alternation did not converge, retrying with damping factor {factor}");
            let mut comps = components.to_vec();
            let outcome = self.run_cycle(
                observed,
                &mut comps,
                1.0 / 3.0,
                3 * max_passes,
                (max_passes / 2).max(2),
                Some(factor),
                &mut should_cancel,
            )?;
            total_passes += outcome.passes;
            let done = outcome.converged || outcome.cancelled;
            last = Some((comps, outcome, factor));
            if done {
                break;
            }
        }

        let (comps, outcome, factor) = match last {
            Some(t) => t,
            // no damping factors configured: report the plain cycle
            None => {
                return Ok(Self::collect(
                    comps,
                    total_passes,
                    false,
                    false,
                    None,
                    false,
                    &outcome.chi2,
                ))
            }
        };
        Ok(Self::collect(
            comps,
            total_passes,
            outcome.converged,
            outcome.success && outcome.converged,
            Some(factor),
            outcome.cancelled,
            &outcome.chi2,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        comps: Vec<Component>,
        passes: usize,
        converged: bool,
        success: bool,
        damping_factor: Option<f64>,
        cancelled: bool,
        chi2: &[f64],
    ) -> MultiFitResult {
        let components = comps
            .into_iter()
            .zip(chi2)
            .map(|(c, chi2)| ComponentResult {
                name: c.name,
                params: c.params,
                reduced_chi2: *chi2,
            })
            .collect();
        MultiFitResult {
            components,
            passes,
            converged,
            success,
            damping_factor,
            cancelled,
        }
    }

    /// One full alternation cycle, driven by the explicit state machine.
    #[allow(clippy::too_many_arguments)]
    fn run_cycle<F>(
        &self,
        observed: &Spectrum,
        comps: &mut [Component],
        threshold_scale: f64,
        max_passes: usize,
        min_passes: usize,
        damping: Option<f64>,
        should_cancel: &mut F,
    ) -> Result<CycleOutcome, SpecfitError>
    where
        F: FnMut() -> bool,
    {
        let single = ParamsFit::new(self.interpolator, self.params);

        // value history per (component, parameter), one entry per pass
        let mut history: AHashMap<(usize, String), Vec<f64>> = AHashMap::new();
        // last fitted model per component, in observed flux units
        let mut models: Vec<Option<Spectrum>> = vec![None; comps.len()];
        let mut chi2 = vec![f64::NAN; comps.len()];
        let mut success = true;
        let mut passes = 0usize;

        let mut state = FitState::Initializing;
        let (converged, cancelled) = loop {
            state = match state {
                FitState::Initializing => FitState::FittingComponent(0),

                FitState::FittingComponent(i) => {
                    let target = self.isolate_component(observed, comps, i, &models)?;
                    let free: Vec<&str> =
                        comps[i].fit_names.iter().map(|n| n.as_str()).collect();
                    let init: Vec<f64> = comps[i]
                        .fit_names
                        .iter()
                        .map(|n| comps[i].params.value(n))
                        .collect::<Result<_, _>>()?;

                    let res = single.fit(&target, &comps[i].params, &free)?;

                    for (name, init) in comps[i].fit_names.clone().iter().zip(init) {
                        let fitted = res.params.value(name)?;
                        let value = match damping {
                            Some(f) => init + f * (fitted - init),
                            None => fitted,
                        };
                        comps[i].params.set_value(name, value)?;
                        let stderr = res.params.get(name).and_then(|p| p.uncertainty);
                        comps[i].params.set_uncertainty(name, stderr)?;
                    }
                    success &= res.success;
                    chi2[i] = res.reduced_chi2;
                    if comps.len() > 1 {
                        models[i] = Some(self.component_model(&comps[i].params, &target)?);
                    }

                    if i + 1 < comps.len() {
                        FitState::FittingComponent(i + 1)
                    } else {
                        FitState::CheckingConvergence
                    }
                }

                FitState::CheckingConvergence => {
                    passes += 1;
                    for (i, comp) in comps.iter().enumerate() {
                        for name in &comp.fit_names {
                            history
                                .entry((i, name.clone()))
                                .or_default()
                                .push(comp.params.value(name)?);
                        }
                    }
                    if should_cancel() {
                        break (false, true);
                    }
                    if passes >= min_passes && self.has_converged(&history, threshold_scale) {
                        FitState::Converged
                    } else if passes >= max_passes {
                        FitState::MaxIterationsReached
                    } else {
                        FitState::FittingComponent(0)
                    }
                }

                FitState::Converged => break (true, false),
                FitState::MaxIterationsReached => break (false, false),
            };
        };

        log::debug!(
            "alternation cycle finished: {passes} passes, converged={converged}, \
             success={success}, cancelled={cancelled}"
        );

        Ok(CycleOutcome {
            passes,
            converged,
            success,
            cancelled,
            chi2,
        })
    }

    /// True when every fitted parameter moved by less than its threshold
    /// between the last two passes.
    fn has_converged(&self, history: &AHashMap<(usize, String), Vec<f64>>, scale: f64) -> bool {
        history.iter().all(|((_, name), values)| {
            let n = values.len();
            n >= 2 && (values[n - 1] - values[n - 2]).abs() <= self.params.threshold_for(name) * scale
        })
    }

    /// Remove the contributions of all components except `keep` from the
    /// observation, per the configured combination rule.
    ///
    /// Each removed component contributes its model from its own last fit
    /// (continuum-corrected against the target it was fitted to, so the
    /// removal happens in observed flux units). A component that has not
    /// been fitted yet contributes its raw interpolated spectrum. The
    /// continuum is never refitted against the composite here: such a fit
    /// would absorb the other components' flux into the correction curve.
    fn isolate_component(
        &self,
        observed: &Spectrum,
        comps: &[Component],
        keep: usize,
        models: &[Option<Spectrum>],
    ) -> Result<Spectrum, SpecfitError> {
        let mut work = observed.clone();
        for (j, comp) in comps.iter().enumerate() {
            if j == keep {
                continue;
            }
            let raw;
            let model = match &models[j] {
                Some(model) => model,
                None => {
                    let synthetic = self.interpolator.interpolate(&comp.params)?;
                    raw = synthetic.resample_onto(observed.wave())?;
                    &raw
                }
            };
            match self.params.combination {
                CombinationRule::Sum => work.subtract(model)?,
                CombinationRule::Product => work.divide(model)?,
            }
        }
        Ok(work)
    }

    /// Forward model of one component in observed flux units: interpolate at
    /// its current parameters, resample onto the target, and apply the
    /// continuum correction established against that target.
    fn component_model(
        &self,
        params: &ParameterVector,
        target: &Spectrum,
    ) -> Result<Spectrum, SpecfitError> {
        let synthetic = self.interpolator.interpolate(params)?;
        let resampled = synthetic.resample_onto(target.wave())?;
        let mut masked = target.clone();
        apply_masks(&mut masked, &self.params.mask_rules);
        let weights = effective_weight(&masked, &self.params.weight_sources)?;
        self.params
            .continuum
            .fit_and_apply(&resampled, &masked, &weights)
    }
}

//! # Fit parameters
//!
//! This module defines [`Parameter`] and [`ParameterVector`], the mapping from
//! physical parameter names (effective temperature, surface gravity, ...) to
//! their current values, bounds, free/fixed flags, and fitted uncertainties.
//!
//! The free/fixed flag stored here is only a *default*: which parameters
//! actually vary is resolved per call through the explicit free-parameter list
//! passed to [`ParamsFit::fit`](crate::fit::single::ParamsFit::fit), so a
//! multi-pass driver can progressively unlock parameters without mutating
//! shared state.
//!
//! Iteration order is the insertion order, which keeps result columns and
//! minimizer layouts deterministic.

use crate::specfit_errors::SpecfitError;

/// One named physical parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// Lower bound, `f64::NEG_INFINITY` when unconstrained.
    pub min: f64,
    /// Upper bound, `f64::INFINITY` when unconstrained.
    pub max: f64,
    /// Default free/fixed flag; overridden per fit call.
    pub free: bool,
    /// Standard error from the last fit, when available.
    pub uncertainty: Option<f64>,
}

impl Parameter {
    /// New fixed parameter with unconstrained bounds and no uncertainty.
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            free: false,
            uncertainty: None,
        }
    }

    /// Set explicit bounds.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the default free flag.
    pub fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }
}

/// Ordered name → [`Parameter`] mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterVector {
    params: Vec<Parameter>,
}

impl ParameterVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing any existing one with the same name.
    pub fn push(&mut self, param: Parameter) {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(slot) => *slot = param,
            None => self.params.push(param),
        }
    }

    /// Set a value, inserting a fresh fixed parameter when the name is new.
    pub fn set(&mut self, name: &str, value: f64) {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.value = value;
                p.uncertainty = None;
            }
            None => self.params.push(Parameter::new(name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    /// Current value of a named parameter.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::UnknownParameter`] – the name is not present.
    pub fn value(&self, name: &str) -> Result<f64, SpecfitError> {
        self.get(name)
            .map(|p| p.value)
            .ok_or_else(|| SpecfitError::UnknownParameter(name.to_string()))
    }

    /// Overwrite the value of an existing parameter.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), SpecfitError> {
        self.get_mut(name)
            .map(|p| p.value = value)
            .ok_or_else(|| SpecfitError::UnknownParameter(name.to_string()))
    }

    /// Record a fitted standard error on an existing parameter.
    pub fn set_uncertainty(
        &mut self,
        name: &str,
        uncertainty: Option<f64>,
    ) -> Result<(), SpecfitError> {
        self.get_mut(name)
            .map(|p| p.uncertainty = uncertainty)
            .ok_or_else(|| SpecfitError::UnknownParameter(name.to_string()))
    }

    /// Flip the default free flag of an existing parameter.
    pub fn set_free(&mut self, name: &str, free: bool) -> Result<(), SpecfitError> {
        self.get_mut(name)
            .map(|p| p.free = free)
            .ok_or_else(|| SpecfitError::UnknownParameter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// Names whose default free flag is set.
    pub fn free_names(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.free)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<Parameter> for ParameterVector {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        let mut params = ParameterVector::new();
        for p in iter {
            params.push(p);
        }
        params
    }
}

#[cfg(test)]
mod params_test {
    use super::*;

    #[test]
    fn set_inserts_then_updates() {
        let mut params = ParameterVector::new();
        params.set("teff", 5000.0);
        params.set("logg", 4.5);
        params.set("teff", 5500.0);
        assert_eq!(params.len(), 2);
        assert_eq!(params.value("teff").unwrap(), 5500.0);
        // insertion order preserved
        let names: Vec<_> = params.names().collect();
        assert_eq!(names, vec!["teff", "logg"]);
    }

    #[test]
    fn unknown_parameter_is_reported() {
        let params = ParameterVector::new();
        assert_eq!(
            params.value("feh"),
            Err(SpecfitError::UnknownParameter("feh".into()))
        );
    }

    #[test]
    fn updating_a_value_clears_stale_uncertainty() {
        let mut params = ParameterVector::new();
        params.set("teff", 5000.0);
        params.set_uncertainty("teff", Some(12.0)).unwrap();
        params.set("teff", 5100.0);
        assert_eq!(params.get("teff").unwrap().uncertainty, None);
    }
}

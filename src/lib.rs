//! Stellar-spectrum fitting: interpolate synthetic spectra from a
//! multi-dimensional model grid and fit them to observations by iterative
//! weighted least squares.
//!
//! Entry points: [`SpectralGrid`] + [`GridInterpolator`] for synthesis,
//! [`FitEngine`] for fitting, [`BatchFit`] for whole target sets.

pub mod constants;
pub mod continuum;
pub mod engine;
pub mod fit;
pub mod grid;
pub mod interpolate;
pub mod minimize;
pub mod params;
pub mod specfit_errors;
pub mod spectrum;
pub mod weights;

pub use constants::{TargetId, TargetSet};
pub use continuum::ContinuumModel;
pub use engine::FitEngine;
pub use fit::batch::{BatchFit, FullFitResult, PixelCountStats};
pub use fit::multi::{Component, ComponentResult, FitState, MultiFit, MultiFitResult};
pub use fit::single::ParamsFit;
pub use fit::{CombinationRule, FitParams, FitResult};
pub use grid::{GridAxis, GridPoint, SpectralGrid};
pub use interpolate::GridInterpolator;
pub use minimize::{LevenbergMarquardt, MinimizeOutcome, Minimizer};
pub use params::{Parameter, ParameterVector};
pub use specfit_errors::SpecfitError;
pub use spectrum::Spectrum;
pub use weights::{MaskRule, WavelengthWeight, WeightProfile, WeightSource};

//! # Constants and type definitions for specfit
//!
//! This module centralizes the **numerical tolerances**, **default convergence
//! thresholds**, and **common type definitions** used throughout the `specfit`
//! library. It also defines the container type for batches of observed spectra.
//!
//! ## Overview
//!
//! - Floating-point comparison tolerances for wavelength and axis matching
//! - Default per-parameter convergence thresholds of the iterative driver
//! - Core type aliases used across the crate
//! - Container type for storing observed target spectra
//!
//! These definitions are used by all main modules, including grid handling,
//! interpolation, and the fitting drivers.

use std::collections::HashMap;

use crate::spectrum::Spectrum;

// -------------------------------------------------------------------------------------------------
// Numerical tolerances
// -------------------------------------------------------------------------------------------------

/// Relative tolerance used when matching a coordinate against a grid sample value
pub const AXIS_MATCH_EPS: f64 = 1e-9;

/// Absolute tolerance used when comparing two wavelength samplings
pub const WAVE_MATCH_EPS: f64 = 1e-8;

/// Guard value below which a synthetic flux is considered zero when forming
/// observed/synthetic ratios (continuum fitting, component division)
pub const FLUX_RATIO_GUARD: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Default convergence thresholds
// -------------------------------------------------------------------------------------------------

/// Default convergence threshold for effective-temperature-like parameters \[K\]
pub const THRESHOLD_TEFF: f64 = 25.0;

/// Default convergence threshold for velocity and broadening parameters \[km/s\]
pub const THRESHOLD_VELOCITY: f64 = 1.0;

/// Default convergence threshold for all remaining parameters (log g, \[M/H\], ...)
pub const THRESHOLD_DEFAULT: f64 = 0.05;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Identifier of one observed target (e.g. the stem of its source file)
pub type TargetId = String;

/// A batch of observed spectra, keyed by target identifier.
///
/// Uses `ahash::RandomState` as the hasher, matching the other maps in the crate.
pub type TargetSet = HashMap<TargetId, Spectrum, ahash::RandomState>;

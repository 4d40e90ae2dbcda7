//! # Spectral grid
//!
//! This module defines the parameter-space description and the in-memory store
//! of reference spectra:
//!
//! * [`GridAxis`] – the discrete, possibly irregular sampling of one physical
//!   parameter (strictly increasing, at least two points),
//! * [`GridPoint`] – the composite lookup key, an ordered tuple of axis values
//!   made hashable through `ordered_float`,
//! * [`SpectralGrid`] – the exact-coordinate map from grid points to stored
//!   [`Spectrum`](crate::spectrum::Spectrum) instances.
//!
//! The grid is built once at startup and read-only afterwards; all fits in a
//! run share it behind an `Arc` without locks. Every stored spectrum shares
//! the same wavelength sampling: spectra inserted on a different sampling are
//! resampled against the first one.
//!
//! Holes are allowed: a coordinate combination whose spectrum could not be
//! loaded is simply absent, and the interpolator degrades its order around it.
//!
//! ## See also
//! ------------
//! * [`GridInterpolator`](crate::interpolate::GridInterpolator) – evaluates the
//!   grid at arbitrary (non-sample) coordinates.

use std::collections::HashMap;

use ahash::RandomState;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::constants::AXIS_MATCH_EPS;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;

/// Discrete sampling of one fitted physical parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    name: String,
    values: Vec<f64>,
}

impl GridAxis {
    /// Build an axis from its name and sample values.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidAxis`] – fewer than 2 points, non-finite
    ///   values, or values not strictly increasing.
    pub fn new(name: &str, values: Vec<f64>) -> Result<Self, SpecfitError> {
        if values.len() < 2
            || values.iter().any(|v| !v.is_finite())
            || values.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(SpecfitError::InvalidAxis(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            values,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false // constructor guarantees at least 2 points
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.values[0]
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Index of the lower end of the cell bracketing `x`.
    ///
    /// The returned index `j` satisfies `j <= len - 2`; for `x` outside the
    /// axis range the edge cell is returned, so callers can clamp-and-evaluate
    /// after their own bounds policy has been applied.
    pub fn locate(&self, x: f64) -> usize {
        self.values
            .partition_point(|v| *v < x)
            .saturating_sub(1)
            .min(self.values.len() - 2)
    }

    /// Index of the sample matching `x` within [`AXIS_MATCH_EPS`], if any.
    pub fn index_of(&self, x: f64) -> Option<usize> {
        let scale = self.max().abs().max(self.min().abs()).max(1.0);
        self.values
            .iter()
            .position(|v| (v - x).abs() <= AXIS_MATCH_EPS * scale)
    }

    /// Width of the first (`lower = true`) or last cell, used to express
    /// extrapolation tolerances in units of the edge step.
    pub fn edge_step(&self, lower: bool) -> f64 {
        if lower {
            self.values[1] - self.values[0]
        } else {
            let n = self.values.len();
            self.values[n - 1] - self.values[n - 2]
        }
    }
}

/// Composite lookup key: one value per grid axis, in axis order.
///
/// Backed by `OrderedFloat` so it can serve as a hash-map key; grids rarely
/// exceed a handful of axes, hence the inline `SmallVec`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridPoint(SmallVec<[OrderedFloat<f64>; 4]>);

impl GridPoint {
    pub fn from_slice(coords: &[f64]) -> Self {
        Self(coords.iter().map(|c| OrderedFloat(*c)).collect())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|v| v.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// In-memory store of reference spectra, keyed by exact grid coordinates.
#[derive(Debug, Clone)]
pub struct SpectralGrid {
    axes: Vec<GridAxis>,
    /// Shared wavelength sampling, fixed by the first inserted spectrum.
    wave: Vec<f64>,
    spectra: HashMap<GridPoint, Spectrum, RandomState>,
}

impl SpectralGrid {
    /// New empty grid over the given axes.
    pub fn new(axes: Vec<GridAxis>) -> Self {
        Self {
            axes,
            wave: Vec::new(),
            spectra: HashMap::default(),
        }
    }

    /// Build a grid by calling `load` for every axis-value combination.
    ///
    /// This is the seam to the external grid storage: `load` receives the
    /// coordinate tuple and returns the stored spectrum, or `None` when the
    /// combination is missing (a grid hole).
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::EmptyGrid`] – the loader produced no spectrum at all.
    /// * Any error from [`SpectralGrid::insert`].
    pub fn from_loader<F>(axes: Vec<GridAxis>, mut load: F) -> Result<Self, SpecfitError>
    where
        F: FnMut(&[f64]) -> Option<Spectrum>,
    {
        let mut grid = Self::new(axes);
        let combos: Vec<Vec<f64>> = grid
            .axes
            .iter()
            .map(|a| a.values().to_vec())
            .multi_cartesian_product()
            .collect();
        for coords in combos {
            if let Some(spec) = load(&coords) {
                grid.insert(&coords, spec)?;
            }
        }
        if grid.spectra.is_empty() {
            return Err(SpecfitError::EmptyGrid);
        }
        log::debug!(
            "loaded spectral grid: {} axes, {} spectra, {} pixels",
            grid.axes.len(),
            grid.spectra.len(),
            grid.wave.len()
        );
        Ok(grid)
    }

    /// Insert a spectrum at an exact grid coordinate.
    ///
    /// The first inserted spectrum fixes the shared wavelength sampling;
    /// later spectra on a different sampling are resampled onto it.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::CoordinateDimension`] – wrong number of coordinate values.
    /// * [`SpecfitError::CoordinateNotOnGrid`] – a value is not an axis sample.
    pub fn insert(&mut self, coords: &[f64], spectrum: Spectrum) -> Result<(), SpecfitError> {
        if coords.len() != self.axes.len() {
            return Err(SpecfitError::CoordinateDimension {
                expected: self.axes.len(),
                got: coords.len(),
            });
        }
        let mut key: SmallVec<[f64; 4]> = SmallVec::new();
        for (axis, &value) in self.axes.iter().zip(coords) {
            let idx = axis
                .index_of(value)
                .ok_or_else(|| SpecfitError::CoordinateNotOnGrid {
                    axis: axis.name().to_string(),
                    value,
                })?;
            // snap to the canonical sample value so lookups are exact
            key.push(axis.values()[idx]);
        }

        let spectrum = if self.wave.is_empty() {
            self.wave = spectrum.wave().to_vec();
            spectrum
        } else if spectrum.wave().len() == self.wave.len()
            && spectrum
                .wave()
                .iter()
                .zip(&self.wave)
                .all(|(a, b)| (a - b).abs() <= crate::constants::WAVE_MATCH_EPS)
        {
            spectrum
        } else {
            spectrum.resample_onto(&self.wave)?
        };

        self.spectra.insert(GridPoint::from_slice(&key), spectrum);
        Ok(())
    }

    #[inline]
    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    /// Axis with the given name, if any.
    pub fn axis(&self, name: &str) -> Option<&GridAxis> {
        self.axes.iter().find(|a| a.name() == name)
    }

    /// Shared wavelength sampling of all stored spectra.
    #[inline]
    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    /// Number of stored spectra.
    #[inline]
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// Exact lookup: returns the stored spectrum for a coordinate that matches
    /// axis samples (within tolerance), or `None` for holes and off-sample
    /// coordinates.
    pub fn get(&self, coords: &[f64]) -> Option<&Spectrum> {
        if coords.len() != self.axes.len() {
            return None;
        }
        let mut key: SmallVec<[f64; 4]> = SmallVec::new();
        for (axis, &value) in self.axes.iter().zip(coords) {
            key.push(axis.values()[axis.index_of(value)?]);
        }
        self.spectra.get(&GridPoint::from_slice(&key))
    }

    /// Nearest stored grid point to an arbitrary coordinate, in per-axis
    /// span-normalized distance. `None` when the grid is empty.
    pub fn nearest(&self, coords: &[f64]) -> Option<(&GridPoint, &Spectrum)> {
        if coords.len() != self.axes.len() {
            return None;
        }
        self.spectra.iter().min_by(|(a, _), (b, _)| {
            let d = |p: &GridPoint| -> f64 {
                p.values()
                    .zip(coords)
                    .zip(&self.axes)
                    .map(|((v, c), axis)| {
                        let span = axis.max() - axis.min();
                        ((v - c) / span).powi(2)
                    })
                    .sum()
            };
            d(a).total_cmp(&d(b))
        })
    }
}

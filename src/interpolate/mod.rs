//! # Grid interpolation
//!
//! This module provides [`GridInterpolator`], which evaluates a
//! [`SpectralGrid`](crate::grid::SpectralGrid) at arbitrary parameter
//! coordinates and produces a synthetic [`Spectrum`](crate::spectrum::Spectrum).
//!
//! ## Algorithm outline
//!
//! 1. For each axis, locate the bracketing pair of samples by binary search.
//! 2. Extend the bracket by `window` extra neighbors on each side and fit a
//!    natural cubic through the window: the second derivatives estimated from
//!    the extended neighborhood keep the interpolated flux and its derivative
//!    continuous across cell boundaries, unlike a two-point Hermite scheme.
//! 3. Nest the 1-D scheme across axes in fixed axis order (tensor
//!    interpolation); the result is deterministic.
//!
//! ## Degradation and failure
//!
//! * At grid edges (or next to holes) fewer neighbors are available and the
//!   window shrinks; with only two usable points the cubic degrades to linear
//!   interpolation rather than failing.
//! * Fewer than two usable points on an axis is fatal:
//!   [`SpecfitError::InsufficientGridCoverage`].
//! * Coordinates outside the axis bounds beyond the configured extrapolation
//!   tolerance are fatal: [`SpecfitError::OutOfGridRange`], naming the axis
//!   and its valid range.
//!
//! Interpolation is a pure function of grid and coordinate; the grid is held
//! behind an `Arc` and shared read-only across parallel fits.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use specfit::grid::SpectralGrid;
//! use specfit::interpolate::GridInterpolator;
//! use specfit::params::ParameterVector;
//!
//! # fn demo(grid: SpectralGrid) -> Result<(), specfit::specfit_errors::SpecfitError> {
//! let interp = GridInterpolator::new(Arc::new(grid)).with_window(2);
//! let mut coords = ParameterVector::new();
//! coords.set("teff", 5800.0);
//! coords.set("logg", 4.7);
//! let synthetic = interp.interpolate(&coords)?;
//! # Ok(()) }
//! ```

pub mod spline;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::constants::AXIS_MATCH_EPS;
use crate::grid::SpectralGrid;
use crate::params::ParameterVector;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;

/// Multi-dimensional spline interpolator over a shared spectral grid.
#[derive(Debug, Clone)]
pub struct GridInterpolator {
    grid: Arc<SpectralGrid>,
    /// Extra neighbors per side beyond the bracketing pair.
    window: usize,
    /// Allowed overshoot past an axis edge, as a fraction of the edge cell width.
    extrapolation_tolerance: f64,
    /// Optional clamp of interpolated flux to the bracketing samples' range,
    /// widened by this fraction of the local span.
    overshoot_margin: Option<f64>,
}

impl GridInterpolator {
    /// New interpolator with one extra neighbor per side (4-point windows),
    /// no extrapolation tolerance and no overshoot clamping.
    pub fn new(grid: Arc<SpectralGrid>) -> Self {
        Self {
            grid,
            window: 1,
            extrapolation_tolerance: 0.0,
            overshoot_margin: None,
        }
    }

    /// Set the number of extra neighbors used per side of the bracketing pair.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the extrapolation tolerance at grid edges, in units of the edge
    /// cell width.
    pub fn with_extrapolation_tolerance(mut self, tolerance: f64) -> Self {
        self.extrapolation_tolerance = tolerance;
        self
    }

    /// Clamp interpolated fluxes to the local range of the bracketing samples
    /// widened by `margin` (a fraction of the local span).
    pub fn with_overshoot_margin(mut self, margin: Option<f64>) -> Self {
        self.overshoot_margin = margin;
        self
    }

    /// The shared grid this interpolator evaluates.
    #[inline]
    pub fn grid(&self) -> &SpectralGrid {
        &self.grid
    }

    /// Bounds of one axis widened by the extrapolation tolerance, as used by
    /// both coordinate validation and minimizer bounds.
    pub fn axis_bounds(&self, name: &str) -> Option<(f64, f64)> {
        let axis = self.grid.axis(name)?;
        let lo = axis.min() - self.extrapolation_tolerance * axis.edge_step(true);
        let hi = axis.max() + self.extrapolation_tolerance * axis.edge_step(false);
        Some((lo, hi))
    }

    /// Check that a coordinate lies inside the grid (within the extrapolation
    /// tolerance on every axis).
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::UnknownParameter`] – an axis has no value in `params`.
    /// * [`SpecfitError::OutOfGridRange`] – a value exceeds the tolerated
    ///   range; the error names the offending axis and its valid range.
    pub fn validate(&self, params: &ParameterVector) -> Result<(), SpecfitError> {
        for axis in self.grid.axes() {
            let value = params.value(axis.name())?;
            let lo = axis.min() - self.extrapolation_tolerance * axis.edge_step(true);
            let hi = axis.max() + self.extrapolation_tolerance * axis.edge_step(false);
            if value < lo || value > hi {
                return Err(SpecfitError::OutOfGridRange {
                    axis: axis.name().to_string(),
                    value,
                    min: axis.min(),
                    max: axis.max(),
                });
            }
        }
        Ok(())
    }

    /// Produce a synthetic spectrum at an arbitrary parameter coordinate.
    ///
    /// `params` must carry one value per grid axis; extra entries are ignored.
    /// Coordinates matching a stored sample return that stored spectrum.
    /// Values inside the extrapolation tolerance are clamped onto the axis
    /// range before evaluation.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::UnknownParameter`] – missing axis value.
    /// * [`SpecfitError::OutOfGridRange`] – coordinate beyond tolerance.
    /// * [`SpecfitError::InsufficientGridCoverage`] – fewer than two usable
    ///   grid points along an axis.
    pub fn interpolate(&self, params: &ParameterVector) -> Result<Spectrum, SpecfitError> {
        self.validate(params)?;

        let mut coords: SmallVec<[f64; 4]> = SmallVec::new();
        for axis in self.grid.axes() {
            let value = params.value(axis.name())?;
            coords.push(value.clamp(axis.min(), axis.max()));
        }

        // Exact grid points return the stored spectrum untouched.
        if let Some(stored) = self.grid.get(&coords) {
            return Ok(stored.clone());
        }

        let mut prefix = Vec::with_capacity(coords.len());
        let flux = self.interp_axis(0, &mut prefix, &coords)?;
        Spectrum::new(self.grid.wave().to_vec(), flux)
    }

    /// Recursive tensor interpolation along axis `depth`.
    ///
    /// `prefix` holds the concrete grid sample values chosen for the axes
    /// already consumed; the remaining axes are interpolated.
    fn interp_axis(
        &self,
        depth: usize,
        prefix: &mut Vec<f64>,
        coords: &[f64],
    ) -> Result<Vec<f64>, SpecfitError> {
        let axes = self.grid.axes();
        let axis = &axes[depth];
        let value = coords[depth];

        let bracket = axis.locate(value);
        let lo = bracket.saturating_sub(self.window);
        let hi = (bracket + 1 + self.window).min(axis.len() - 1);

        // Collect the usable window samples; holes and deeper coverage
        // failures shrink the window instead of aborting.
        let mut xs: SmallVec<[f64; 8]> = SmallVec::new();
        let mut ys: Vec<Vec<f64>> = Vec::with_capacity(hi - lo + 1);
        for idx in lo..=hi {
            let x = axis.values()[idx];
            prefix.push(x);
            let sub = if depth + 1 == axes.len() {
                Ok(self.grid.get(prefix).map(|s| s.flux().to_vec()))
            } else {
                match self.interp_axis(depth + 1, prefix, coords) {
                    Ok(flux) => Ok(Some(flux)),
                    Err(SpecfitError::InsufficientGridCoverage { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            };
            prefix.pop();
            if let Some(flux) = sub? {
                xs.push(x);
                ys.push(flux);
            }
        }

        if xs.len() < 2 {
            let scale = axis.max().abs().max(1.0);
            if let Some(first) = xs.first() {
                if (first - value).abs() <= AXIS_MATCH_EPS * scale {
                    return Ok(ys.swap_remove(0));
                }
            }
            return Err(SpecfitError::InsufficientGridCoverage {
                axis: axis.name().to_string(),
                value,
                available: xs.len(),
                needed: 2,
            });
        }

        let rows: Vec<&[f64]> = ys.iter().map(|f| f.as_slice()).collect();
        let y2 = spline::second_derivs(&xs, &rows);

        // Holes may have removed the bracketing samples themselves; evaluate
        // on the nearest surviving segment.
        let t = value.clamp(xs[0], xs[xs.len() - 1]);
        let seg = xs
            .partition_point(|x| *x < t)
            .saturating_sub(1)
            .min(xs.len() - 2);
        let mut flux = spline::eval_segment(&xs, &rows, &y2, seg, t);

        if let Some(margin) = self.overshoot_margin {
            for (k, f) in flux.iter_mut().enumerate() {
                let a = rows[seg][k];
                let b = rows[seg + 1][k];
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let pad = margin * (hi - lo);
                *f = f.clamp(lo - pad, hi + pad);
            }
        }

        Ok(flux)
    }
}

#[cfg(test)]
mod interpolate_test {
    use super::*;
    use crate::grid::GridAxis;
    use approx::assert_relative_eq;

    fn linear_grid() -> Arc<SpectralGrid> {
        // flux = 2 + 0.001 * teff - 0.5 * logg, flat over wavelength
        let axes = vec![
            GridAxis::new("teff", vec![5000.0, 5500.0, 6000.0, 6500.0]).unwrap(),
            GridAxis::new("logg", vec![4.0, 4.5, 5.0]).unwrap(),
        ];
        let wave = [4000.0, 4010.0, 4020.0];
        let grid = SpectralGrid::from_loader(axes, |c| {
            let level = 2.0 + 0.001 * c[0] - 0.5 * c[1];
            Some(Spectrum::new(wave.to_vec(), vec![level; wave.len()]).unwrap())
        })
        .unwrap();
        Arc::new(grid)
    }

    fn coords(teff: f64, logg: f64) -> ParameterVector {
        let mut params = ParameterVector::new();
        params.set("teff", teff);
        params.set("logg", logg);
        params
    }

    #[test]
    fn stored_node_is_returned_exactly() {
        let interp = GridInterpolator::new(linear_grid());
        let spec = interp.interpolate(&coords(5500.0, 4.5)).unwrap();
        for f in spec.flux() {
            assert_relative_eq!(*f, 2.0 + 5.5 - 2.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn linear_field_is_reproduced_between_nodes() {
        let interp = GridInterpolator::new(linear_grid());
        let spec = interp.interpolate(&coords(5800.0, 4.7)).unwrap();
        for f in spec.flux() {
            assert_relative_eq!(*f, 2.0 + 5.8 - 2.35, epsilon = 1e-10);
        }
    }

    #[test]
    fn out_of_range_names_the_axis() {
        let interp = GridInterpolator::new(linear_grid());
        let err = interp.interpolate(&coords(7000.0, 4.5)).unwrap_err();
        match err {
            SpecfitError::OutOfGridRange { axis, max, .. } => {
                assert_eq!(axis, "teff");
                assert_eq!(max, 6500.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn edge_overshoot_within_tolerance_is_clamped() {
        let interp = GridInterpolator::new(linear_grid()).with_extrapolation_tolerance(0.1);
        // 6540 is within 0.1 * 500 of the upper edge
        let spec = interp.interpolate(&coords(6540.0, 4.5)).unwrap();
        for f in spec.flux() {
            assert_relative_eq!(*f, 2.0 + 6.5 - 2.25, epsilon = 1e-10);
        }
        assert!(interp.interpolate(&coords(6560.0, 4.5)).is_err());
    }

    #[test]
    fn holes_degrade_to_fewer_points() {
        let axes = vec![GridAxis::new("teff", vec![5000.0, 5500.0, 6000.0, 6500.0]).unwrap()];
        let wave = [4000.0, 4010.0];
        let grid = SpectralGrid::from_loader(axes, |c| {
            // hole at 6000 K
            (c[0] != 6000.0)
                .then(|| Spectrum::new(wave.to_vec(), vec![c[0] / 1000.0; 2]).unwrap())
        })
        .unwrap();
        let interp = GridInterpolator::new(Arc::new(grid));
        let mut params = ParameterVector::new();
        params.set("teff", 5250.0);
        let spec = interp.interpolate(&params).unwrap();
        for f in spec.flux() {
            assert_relative_eq!(*f, 5.25, epsilon = 1e-10);
        }
    }

    #[test]
    fn single_usable_point_is_fatal() {
        let axes = vec![GridAxis::new("teff", vec![5000.0, 5500.0]).unwrap()];
        let wave = [4000.0, 4010.0];
        let grid = SpectralGrid::from_loader(axes, |c| {
            (c[0] == 5000.0).then(|| Spectrum::new(wave.to_vec(), vec![1.0; 2]).unwrap())
        })
        .unwrap();
        let interp = GridInterpolator::new(Arc::new(grid));
        let mut params = ParameterVector::new();
        params.set("teff", 5250.0);
        let err = interp.interpolate(&params).unwrap_err();
        assert!(matches!(
            err,
            SpecfitError::InsufficientGridCoverage { available: 1, .. }
        ));
    }
}

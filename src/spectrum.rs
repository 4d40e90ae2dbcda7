//! # Spectrum container
//!
//! This module defines the [`Spectrum`] type, the basic data container shared by
//! the whole fitting engine: an observed or synthetic spectrum with aligned
//! wavelength, flux, optional per-pixel uncertainty, and per-pixel validity
//! arrays.
//!
//! ## Invariants
//!
//! * Wavelengths are strictly increasing,
//! * All arrays have the same length,
//! * A spectrum is never resized after construction; masking flips validity
//!   flags and continuum rescaling rewrites flux values in place.
//!
//! Both invariants are enforced at construction; all later operations preserve
//! them, so any `Spectrum` handed to the fit routines is structurally valid.
//!
//! ## See also
//! ------------
//! * [`SpectralGrid`](crate::grid::SpectralGrid) – stores reference spectra on a shared sampling.
//! * [`GridInterpolator`](crate::interpolate::GridInterpolator) – produces synthetic spectra.

use crate::constants::{FLUX_RATIO_GUARD, WAVE_MATCH_EPS};
use crate::specfit_errors::SpecfitError;

/// An observed or synthetic spectrum.
///
/// Fields
/// -----------------
/// * `wave` – wavelengths, strictly increasing \[Angstrom\].
/// * `flux` – flux values aligned to `wave`.
/// * `sigma` – optional per-pixel uncertainties aligned to `wave`.
/// * `valid` – per-pixel validity flags; invalid pixels are excluded from fits.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wave: Vec<f64>,
    flux: Vec<f64>,
    sigma: Option<Vec<f64>>,
    valid: Vec<bool>,
}

impl Spectrum {
    /// Build a spectrum from wavelength and flux arrays.
    ///
    /// All pixels start out valid and no uncertainty array is attached.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – array length mismatch, empty
    ///   arrays, non-finite wavelengths, or non-monotonic wavelengths.
    pub fn new(wave: Vec<f64>, flux: Vec<f64>) -> Result<Self, SpecfitError> {
        if wave.is_empty() {
            return Err(SpecfitError::InvalidSpectrum("empty arrays".into()));
        }
        if wave.len() != flux.len() {
            return Err(SpecfitError::InvalidSpectrum(format!(
                "wavelength and flux lengths differ ({} vs {})",
                wave.len(),
                flux.len()
            )));
        }
        if wave.iter().any(|w| !w.is_finite()) {
            return Err(SpecfitError::InvalidSpectrum(
                "non-finite wavelength value".into(),
            ));
        }
        if wave.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpecfitError::InvalidSpectrum(
                "wavelengths are not strictly increasing".into(),
            ));
        }
        let n = wave.len();
        Ok(Self {
            wave,
            flux,
            sigma: None,
            valid: vec![true; n],
        })
    }

    /// Attach a per-pixel uncertainty array.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – length mismatch with the
    ///   wavelength array.
    pub fn with_sigma(mut self, sigma: Vec<f64>) -> Result<Self, SpecfitError> {
        if sigma.len() != self.wave.len() {
            return Err(SpecfitError::InvalidSpectrum(format!(
                "sigma length {} does not match spectrum length {}",
                sigma.len(),
                self.wave.len()
            )));
        }
        self.sigma = Some(sigma);
        Ok(self)
    }

    /// Replace the validity flags wholesale (e.g. from a preexisting mask).
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – length mismatch.
    pub fn with_valid(mut self, valid: Vec<bool>) -> Result<Self, SpecfitError> {
        if valid.len() != self.wave.len() {
            return Err(SpecfitError::InvalidSpectrum(format!(
                "mask length {} does not match spectrum length {}",
                valid.len(),
                self.wave.len()
            )));
        }
        self.valid = valid;
        Ok(self)
    }

    /// Number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    /// True when the spectrum holds no pixels (cannot happen after construction).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Wavelength array.
    #[inline]
    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    /// Flux array.
    #[inline]
    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    /// Optional uncertainty array.
    #[inline]
    pub fn sigma(&self) -> Option<&[f64]> {
        self.sigma.as_deref()
    }

    /// Per-pixel validity flags.
    #[inline]
    pub fn valid(&self) -> &[bool] {
        &self.valid
    }

    /// Number of valid pixels.
    pub fn valid_pixels(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Mark one pixel invalid.
    #[inline]
    pub fn invalidate(&mut self, idx: usize) {
        self.valid[idx] = false;
    }

    /// True when both spectra share the same wavelength sampling
    /// (within [`WAVE_MATCH_EPS`]).
    pub fn same_sampling(&self, other: &Spectrum) -> bool {
        self.wave.len() == other.wave.len()
            && self
                .wave
                .iter()
                .zip(&other.wave)
                .all(|(a, b)| (a - b).abs() <= WAVE_MATCH_EPS)
    }

    /// Normalize the flux to its mean over valid pixels.
    ///
    /// Leaves the spectrum untouched when the mean is zero or no pixel is valid.
    pub fn norm_to_mean(&mut self) {
        let (sum, n) = self
            .flux
            .iter()
            .zip(&self.valid)
            .filter(|(_, v)| **v)
            .fold((0.0, 0usize), |(s, n), (f, _)| (s + f, n + 1));
        if n == 0 {
            return;
        }
        let mean = sum / n as f64;
        if mean.abs() < FLUX_RATIO_GUARD {
            return;
        }
        for f in &mut self.flux {
            *f /= mean;
        }
        if let Some(sigma) = &mut self.sigma {
            for s in sigma {
                *s /= mean;
            }
        }
    }

    /// Multiply the flux by a per-pixel correction curve (continuum rescaling).
    ///
    /// Panics in debug builds when the curve length mismatches; callers build
    /// the curve from this spectrum's own wavelength array.
    pub fn scale_by(&mut self, curve: &[f64]) {
        debug_assert_eq!(curve.len(), self.flux.len());
        for (f, c) in self.flux.iter_mut().zip(curve) {
            *f *= c;
        }
    }

    /// Add a per-pixel correction curve to the flux (additive continuum).
    pub fn shift_by(&mut self, curve: &[f64]) {
        debug_assert_eq!(curve.len(), self.flux.len());
        for (f, c) in self.flux.iter_mut().zip(curve) {
            *f += c;
        }
    }

    /// Resample this spectrum onto a new wavelength array by linear
    /// interpolation.
    ///
    /// Pixels of the new sampling falling outside the source range are set to
    /// zero flux and flagged invalid. Validity is carried over: a resampled
    /// pixel is valid only when both source pixels bracketing it are valid.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – `new_wave` violates the spectrum
    ///   invariants.
    pub fn resample_onto(&self, new_wave: &[f64]) -> Result<Spectrum, SpecfitError> {
        let n = new_wave.len();
        let mut flux = vec![0.0; n];
        let mut valid = vec![false; n];
        let mut sigma = self.sigma.as_ref().map(|_| vec![0.0; n]);

        for (i, &w) in new_wave.iter().enumerate() {
            if w < self.wave[0] - WAVE_MATCH_EPS || w > self.wave[self.len() - 1] + WAVE_MATCH_EPS {
                continue;
            }
            // Index of the first sample >= w, clamped to a valid segment.
            let hi = self
                .wave
                .partition_point(|x| *x < w)
                .clamp(1, self.len() - 1);
            let lo = hi - 1;
            let t = ((w - self.wave[lo]) / (self.wave[hi] - self.wave[lo])).clamp(0.0, 1.0);
            flux[i] = self.flux[lo] * (1.0 - t) + self.flux[hi] * t;
            valid[i] = self.valid[lo] && self.valid[hi];
            if let (Some(out), Some(src)) = (sigma.as_mut(), self.sigma.as_ref()) {
                out[i] = src[lo] * (1.0 - t) + src[hi] * t;
            }
        }

        let mut spec = Spectrum::new(new_wave.to_vec(), flux)?.with_valid(valid)?;
        if let Some(sigma) = sigma {
            spec = spec.with_sigma(sigma)?;
        }
        Ok(spec)
    }

    /// Subtract another spectrum's flux (composite-spectrum component removal).
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – samplings differ.
    pub fn subtract(&mut self, other: &Spectrum) -> Result<(), SpecfitError> {
        if !self.same_sampling(other) {
            return Err(SpecfitError::InvalidSpectrum(
                "cannot subtract spectra on different wavelength samplings".into(),
            ));
        }
        for (f, o) in self.flux.iter_mut().zip(other.flux()) {
            *f -= o;
        }
        Ok(())
    }

    /// Divide by another spectrum's flux (multiplicative component removal).
    ///
    /// Pixels where the divisor is numerically zero are flagged invalid
    /// instead of producing non-finite flux.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – samplings differ.
    pub fn divide(&mut self, other: &Spectrum) -> Result<(), SpecfitError> {
        if !self.same_sampling(other) {
            return Err(SpecfitError::InvalidSpectrum(
                "cannot divide spectra on different wavelength samplings".into(),
            ));
        }
        for i in 0..self.flux.len() {
            let d = other.flux()[i];
            if d.abs() < FLUX_RATIO_GUARD {
                self.valid[i] = false;
            } else {
                self.flux[i] /= d;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod spectrum_test {
    use super::*;

    fn simple() -> Spectrum {
        Spectrum::new(vec![1.0, 2.0, 3.0, 4.0], vec![10.0, 20.0, 30.0, 40.0]).unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let res = Spectrum::new(vec![1.0, 2.0], vec![1.0]);
        assert!(matches!(res, Err(SpecfitError::InvalidSpectrum(_))));
    }

    #[test]
    fn rejects_non_monotonic_wavelengths() {
        let res = Spectrum::new(vec![1.0, 3.0, 2.0], vec![0.0; 3]);
        assert!(matches!(res, Err(SpecfitError::InvalidSpectrum(_))));
    }

    #[test]
    fn norm_to_mean_uses_valid_pixels_only() {
        let mut spec = simple();
        spec.invalidate(3);
        spec.norm_to_mean();
        // mean over the first three pixels is 20
        assert_eq!(spec.flux(), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn resample_interpolates_and_flags_outside_pixels() {
        let spec = simple();
        let out = spec.resample_onto(&[0.5, 1.5, 3.0, 4.5]).unwrap();
        assert!(!out.valid()[0]);
        assert_eq!(out.flux()[1], 15.0);
        assert_eq!(out.flux()[2], 30.0);
        assert!(!out.valid()[3]);
    }

    #[test]
    fn divide_flags_zero_divisor_pixels() {
        let mut spec = simple();
        let div = Spectrum::new(vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 0.0, 2.0, 2.0]).unwrap();
        spec.divide(&div).unwrap();
        assert_eq!(spec.flux()[0], 5.0);
        assert!(!spec.valid()[1]);
    }
}

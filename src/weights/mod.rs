//! # Pixel weights and masks
//!
//! This module defines the two per-pixel policies applied to an observed
//! spectrum before every fit pass:
//!
//! * [`MaskRule`] – flags pixels to *exclude* entirely (negative flux, user
//!   wavelength ranges, detector edges). Conflicting rules combine as the
//!   union of excluded pixels.
//! * [`WeightSource`] – produces one independent [`WeightProfile`] per source
//!   (stored uncertainties, an SNR estimate, wavelength-range rules, or an
//!   externally supplied profile such as a grid-derived heuristic).
//!
//! The effective weight is the elementwise product of all source profiles —
//! multiplication is associative and commutative, so declaration order never
//! matters — with masked pixels forced to exactly zero regardless of any
//! other contribution.
//!
//! Masks are recomputed per fit pass, since rules such as negative-flux
//! flagging depend on the current working spectrum.

use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;

/// Per-pixel multiplicative weight array, aligned to a spectrum.
pub type WeightProfile = Vec<f64>;

/// A half-open wavelength interval carrying a weight factor.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthWeight {
    pub start: f64,
    pub end: f64,
    pub weight: f64,
}

/// One independent source of per-pixel weights.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightSource {
    /// Inverse-variance weights from the stored uncertainty array;
    /// unit weights when the spectrum carries no uncertainties.
    FromSigma,
    /// Weights from a running signal-to-noise estimate over `window` pixels,
    /// normalized to unit mean.
    FromSnr { window: usize },
    /// Unit weights, overridden inside the given wavelength ranges.
    Ranges(Vec<WavelengthWeight>),
    /// An externally derived profile (e.g. a grid-based heuristic),
    /// already aligned to the spectrum.
    Profile(WeightProfile),
}

impl WeightSource {
    /// Compute this source's weight profile for a spectrum.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – a supplied [`WeightSource::Profile`]
    ///   does not match the spectrum length.
    pub fn profile(&self, spectrum: &Spectrum) -> Result<WeightProfile, SpecfitError> {
        let n = spectrum.len();
        match self {
            WeightSource::FromSigma => Ok(match spectrum.sigma() {
                Some(sigma) => sigma
                    .iter()
                    .map(|s| if *s > 0.0 { 1.0 / (s * s) } else { 0.0 })
                    .collect(),
                None => vec![1.0; n],
            }),
            WeightSource::FromSnr { window } => Ok(snr_profile(spectrum, *window)),
            WeightSource::Ranges(ranges) => {
                let mut weights = vec![1.0; n];
                for range in ranges {
                    for (i, &w) in spectrum.wave().iter().enumerate() {
                        if w >= range.start && w < range.end {
                            weights[i] = range.weight;
                        }
                    }
                }
                Ok(weights)
            }
            WeightSource::Profile(profile) => {
                if profile.len() != n {
                    return Err(SpecfitError::InvalidSpectrum(format!(
                        "weight profile length {} does not match spectrum length {n}",
                        profile.len()
                    )));
                }
                Ok(profile.clone())
            }
        }
    }
}

/// Squared running SNR estimate, normalized to unit mean over valid pixels.
fn snr_profile(spectrum: &Spectrum, window: usize) -> WeightProfile {
    let n = spectrum.len();
    let half = window.max(2) / 2;
    let flux = spectrum.flux();

    let mut weights = vec![0.0; n];
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let slice = &flux[lo..hi];
        let m = slice.len() as f64;
        let mean = slice.iter().sum::<f64>() / m;
        let var = slice.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / m;
        if var > 0.0 && mean > 0.0 {
            weights[i] = mean * mean / var; // snr^2
        }
    }

    let (sum, count) = weights
        .iter()
        .zip(spectrum.valid())
        .filter(|(_, v)| **v)
        .fold((0.0, 0usize), |(s, c), (w, _)| (s + w, c + 1));
    if count > 0 && sum > 0.0 {
        let mean = sum / count as f64;
        for w in &mut weights {
            *w /= mean;
        }
    }
    weights
}

/// One pixel-exclusion policy.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskRule {
    /// Exclude pixels with negative flux.
    NegativeFlux,
    /// Exclude pixels inside the given wavelength intervals (start, end).
    Ranges(Vec<(f64, f64)>),
    /// Exclude the given number of pixels at each end of the spectrum.
    Edges { pixels: usize },
}

/// Apply mask rules to a spectrum, flipping validity flags.
///
/// Rules combine as a union: a pixel excluded by any rule stays excluded.
pub fn apply_masks(spectrum: &mut Spectrum, rules: &[MaskRule]) {
    let n = spectrum.len();
    for rule in rules {
        match rule {
            MaskRule::NegativeFlux => {
                for i in 0..n {
                    if spectrum.flux()[i] < 0.0 {
                        spectrum.invalidate(i);
                    }
                }
            }
            MaskRule::Ranges(ranges) => {
                for &(start, end) in ranges {
                    for i in 0..n {
                        let w = spectrum.wave()[i];
                        if w >= start && w < end {
                            spectrum.invalidate(i);
                        }
                    }
                }
            }
            MaskRule::Edges { pixels } => {
                for i in 0..(*pixels).min(n) {
                    spectrum.invalidate(i);
                    spectrum.invalidate(n - 1 - i);
                }
            }
        }
    }
}

/// Combine all weight sources into the effective per-pixel weight.
///
/// The sources multiply elementwise (order-independent); pixels flagged
/// invalid on the spectrum end up with weight exactly zero.
pub fn effective_weight(
    spectrum: &Spectrum,
    sources: &[WeightSource],
) -> Result<WeightProfile, SpecfitError> {
    let mut weights = vec![1.0; spectrum.len()];
    for source in sources {
        let profile = source.profile(spectrum)?;
        for (w, p) in weights.iter_mut().zip(&profile) {
            *w *= p;
        }
    }
    for (w, v) in weights.iter_mut().zip(spectrum.valid()) {
        if !*v {
            *w = 0.0;
        }
    }
    Ok(weights)
}

#[cfg(test)]
mod weights_test {
    use super::*;

    fn spec() -> Spectrum {
        Spectrum::new(
            vec![4000.0, 4010.0, 4020.0, 4030.0],
            vec![1.0, -0.5, 2.0, 1.5],
        )
        .unwrap()
        .with_sigma(vec![0.5, 1.0, 2.0, 0.0])
        .unwrap()
    }

    #[test]
    fn combination_is_order_independent() {
        let spectrum = spec();
        let a = WeightSource::FromSigma;
        let b = WeightSource::Ranges(vec![WavelengthWeight {
            start: 4005.0,
            end: 4025.0,
            weight: 0.5,
        }]);
        let c = WeightSource::Profile(vec![2.0, 2.0, 2.0, 2.0]);

        let abc = effective_weight(&spectrum, &[a.clone(), b.clone(), c.clone()]).unwrap();
        let cab = effective_weight(&spectrum, &[c, a, b]).unwrap();
        assert_eq!(abc, cab);
    }

    #[test]
    fn masked_pixels_always_have_zero_weight() {
        let mut spectrum = spec();
        apply_masks(&mut spectrum, &[MaskRule::NegativeFlux]);
        let weights = effective_weight(
            &spectrum,
            &[WeightSource::Profile(vec![10.0, 10.0, 10.0, 10.0])],
        )
        .unwrap();
        assert_eq!(weights[1], 0.0);
        assert!(weights[0] > 0.0);
    }

    #[test]
    fn sigma_weights_are_inverse_variance() {
        let spectrum = spec();
        let w = WeightSource::FromSigma.profile(&spectrum).unwrap();
        assert_eq!(w[0], 4.0);
        assert_eq!(w[1], 1.0);
        assert_eq!(w[2], 0.25);
        // non-positive sigma cannot contribute
        assert_eq!(w[3], 0.0);
    }

    #[test]
    fn mask_rules_union() {
        let mut spectrum = spec();
        apply_masks(
            &mut spectrum,
            &[
                MaskRule::NegativeFlux,
                MaskRule::Ranges(vec![(4025.0, 4035.0)]),
                MaskRule::Edges { pixels: 1 },
            ],
        );
        assert_eq!(spectrum.valid(), &[false, false, true, false]);
    }

    #[test]
    fn profile_length_mismatch_is_rejected() {
        let spectrum = spec();
        let res = WeightSource::Profile(vec![1.0; 3]).profile(&spectrum);
        assert!(matches!(res, Err(SpecfitError::InvalidSpectrum(_))));
    }
}

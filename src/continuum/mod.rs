//! # Continuum correction models
//!
//! A synthetic spectrum interpolated from the grid never matches the broadband
//! shape of a real observation: flux calibration, extinction, and instrument
//! response all imprint smooth large-scale trends. The [`ContinuumModel`]
//! family estimates a smooth correction curve from the observed/synthetic
//! comparison and applies it to the synthetic spectrum before the residual is
//! formed.
//!
//! All variants share the same contract,
//! [`fit_and_apply`](ContinuumModel::fit_and_apply), so the fit routines are
//! agnostic to which one the configuration selects:
//!
//! * [`ContinuumModel::Polynomial`] – weighted Legendre least squares on the
//!   observed/synthetic ratio, multiplicative correction,
//! * [`ContinuumModel::AdditivePolynomial`] – same basis fitted on the
//!   observed − synthetic difference, additive correction,
//! * [`ContinuumModel::PeakToPeak`] – local upper-envelope knots through the
//!   ratio, robust against strong absorption features that drag a global
//!   polynomial down,
//! * [`ContinuumModel::Spline`] – natural cubic through locally averaged
//!   ratio knots,
//! * [`ContinuumModel::None`] – no correction (synthetic used as-is).
//!
//! When a variant cannot be fitted (too few usable pixels, singular system)
//! the synthetic spectrum is returned unchanged rather than failing the fit.

use nalgebra::{DMatrix, DVector};

use crate::constants::FLUX_RATIO_GUARD;
use crate::interpolate::spline;
use crate::specfit_errors::SpecfitError;
use crate::spectrum::Spectrum;

/// Family of continuum correction models.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuumModel {
    /// No correction; the synthetic spectrum is compared as-is.
    None,
    /// Multiplicative Legendre polynomial of the given degree.
    Polynomial { degree: usize },
    /// Additive Legendre polynomial of the given degree.
    AdditivePolynomial { degree: usize },
    /// Upper-envelope knots over `bins` wavelength bins, cubic through them.
    PeakToPeak { bins: usize },
    /// Natural cubic through `knots` locally averaged ratio knots.
    Spline { knots: usize },
}

impl Default for ContinuumModel {
    /// Degree-40 multiplicative Legendre polynomial.
    fn default() -> Self {
        ContinuumModel::Polynomial { degree: 40 }
    }
}

impl ContinuumModel {
    /// Rescale `synthetic` so its broadband shape matches `observed`.
    ///
    /// `weights` is the effective per-pixel weight array; pixels with zero
    /// weight do not influence the correction. The returned spectrum lives on
    /// the synthetic spectrum's own wavelength sampling.
    ///
    /// Errors
    /// ----------
    /// * [`SpecfitError::InvalidSpectrum`] – the two spectra (or the weight
    ///   array) are not on the same sampling.
    pub fn fit_and_apply(
        &self,
        synthetic: &Spectrum,
        observed: &Spectrum,
        weights: &[f64],
    ) -> Result<Spectrum, SpecfitError> {
        if !synthetic.same_sampling(observed) || weights.len() != synthetic.len() {
            return Err(SpecfitError::InvalidSpectrum(
                "continuum fit requires spectra and weights on one sampling".into(),
            ));
        }

        let mut out = synthetic.clone();
        match self {
            ContinuumModel::None => {}
            ContinuumModel::Polynomial { degree } => {
                let pts = ratio_points(synthetic, observed, weights);
                if let Some(curve) = polynomial_curve(synthetic.wave(), &pts, *degree) {
                    out.scale_by(&curve);
                } else {
                    log::debug!("continuum polynomial fit degenerate, skipping correction");
                }
            }
            ContinuumModel::AdditivePolynomial { degree } => {
                let pts = diff_points(synthetic, observed, weights);
                if let Some(curve) = polynomial_curve(synthetic.wave(), &pts, *degree) {
                    out.shift_by(&curve);
                }
            }
            ContinuumModel::PeakToPeak { bins } => {
                let pts = ratio_points(synthetic, observed, weights);
                if let Some(curve) = envelope_curve(synthetic.wave(), &pts, *bins) {
                    out.scale_by(&curve);
                }
            }
            ContinuumModel::Spline { knots } => {
                let pts = ratio_points(synthetic, observed, weights);
                if let Some(curve) = knot_curve(synthetic.wave(), &pts, *knots) {
                    out.scale_by(&curve);
                }
            }
        }
        Ok(out)
    }
}

/// One usable comparison pixel: wavelength, target value, weight.
struct FitPoint {
    wave: f64,
    value: f64,
    weight: f64,
}

fn ratio_points(synthetic: &Spectrum, observed: &Spectrum, weights: &[f64]) -> Vec<FitPoint> {
    (0..synthetic.len())
        .filter(|&i| weights[i] > 0.0 && synthetic.flux()[i].abs() > FLUX_RATIO_GUARD)
        .map(|i| FitPoint {
            wave: synthetic.wave()[i],
            value: observed.flux()[i] / synthetic.flux()[i],
            weight: weights[i],
        })
        .collect()
}

fn diff_points(synthetic: &Spectrum, observed: &Spectrum, weights: &[f64]) -> Vec<FitPoint> {
    (0..synthetic.len())
        .filter(|&i| weights[i] > 0.0)
        .map(|i| FitPoint {
            wave: synthetic.wave()[i],
            value: observed.flux()[i] - synthetic.flux()[i],
            weight: weights[i],
        })
        .collect()
}

/// Legendre polynomial basis row for `t` in [-1, 1].
fn legendre_row(t: f64, ncoef: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(ncoef);
    let mut p_prev = 1.0;
    let mut p = t;
    row.push(p_prev);
    if ncoef > 1 {
        row.push(p);
    }
    for k in 1..ncoef.saturating_sub(1) {
        let kf = k as f64;
        let p_next = ((2.0 * kf + 1.0) * t * p - kf * p_prev) / (kf + 1.0);
        row.push(p_next);
        p_prev = p;
        p = p_next;
    }
    row
}

/// Map a wavelength onto [-1, 1] over the full spectrum range.
fn normalize_wave(wave: &[f64], w: f64) -> f64 {
    let (lo, hi) = (wave[0], wave[wave.len() - 1]);
    if hi <= lo {
        return 0.0;
    }
    2.0 * (w - lo) / (hi - lo) - 1.0
}

/// Solve a least-squares system by SVD with a tolerance ladder, so nearly
/// collinear basis columns do not abort the continuum fit.
fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}

/// Weighted Legendre fit of the points, evaluated on the full wavelength array.
///
/// The degree shrinks to the number of points minus one when the data cannot
/// support the requested order. `None` when fewer than two points remain or
/// the system is singular.
fn polynomial_curve(wave: &[f64], pts: &[FitPoint], degree: usize) -> Option<Vec<f64>> {
    if pts.len() < 2 {
        return None;
    }
    let ncoef = degree.min(pts.len() - 1) + 1;

    let mut design = DMatrix::zeros(pts.len(), ncoef);
    let mut rhs = DVector::zeros(pts.len());
    for (i, pt) in pts.iter().enumerate() {
        let sw = pt.weight.sqrt();
        let row = legendre_row(normalize_wave(wave, pt.wave), ncoef);
        for (j, b) in row.iter().enumerate() {
            design[(i, j)] = sw * b;
        }
        rhs[i] = sw * pt.value;
    }

    let beta = solve_least_squares(&design, &rhs)?;
    Some(
        wave.iter()
            .map(|&w| {
                legendre_row(normalize_wave(wave, w), ncoef)
                    .iter()
                    .zip(beta.iter())
                    .map(|(b, c)| b * c)
                    .sum()
            })
            .collect(),
    )
}

/// Natural cubic through a knot sequence, evaluated on the wavelength array.
/// Wavelengths outside the knot range use the nearest edge segment.
fn spline_through(wave: &[f64], kx: &[f64], ky: &[f64]) -> Vec<f64> {
    let y2 = spline::second_derivs_scalar(kx, ky);
    wave.iter()
        .map(|&w| {
            let t = w.clamp(kx[0], kx[kx.len() - 1]);
            let seg = kx
                .partition_point(|x| *x < t)
                .saturating_sub(1)
                .min(kx.len() - 2);
            spline::eval_segment_scalar(kx, ky, &y2, seg, t)
        })
        .collect()
}

/// Upper-envelope knots: split the usable pixels into equal-width wavelength
/// bins and keep the peak ratio of each bin.
fn envelope_curve(wave: &[f64], pts: &[FitPoint], bins: usize) -> Option<Vec<f64>> {
    if pts.is_empty() || bins < 2 {
        return None;
    }
    let lo = wave[0];
    let width = (wave[wave.len() - 1] - lo) / bins as f64;

    let mut kx = Vec::with_capacity(bins);
    let mut ky = Vec::with_capacity(bins);
    for b in 0..bins {
        let (start, end) = (lo + b as f64 * width, lo + (b + 1) as f64 * width);
        let peak = pts
            .iter()
            .filter(|p| p.wave >= start && (p.wave < end || b == bins - 1))
            .max_by(|a, b| a.value.total_cmp(&b.value));
        if let Some(p) = peak {
            kx.push(p.wave);
            ky.push(p.value);
        }
    }
    (kx.len() >= 2).then(|| spline_through(wave, &kx, &ky))
}

/// Locally averaged knots: each usable pixel contributes to its nearest of
/// `knots` evenly spaced positions, weighted by its fit weight.
fn knot_curve(wave: &[f64], pts: &[FitPoint], knots: usize) -> Option<Vec<f64>> {
    if pts.is_empty() || knots < 2 {
        return None;
    }
    let lo = wave[0];
    let span = wave[wave.len() - 1] - lo;

    let mut sums = vec![0.0; knots];
    let mut wsums = vec![0.0; knots];
    for p in pts {
        let k = (((p.wave - lo) / span) * (knots - 1) as f64).round() as usize;
        let k = k.min(knots - 1);
        sums[k] += p.weight * p.value;
        wsums[k] += p.weight;
    }

    let mut kx = Vec::with_capacity(knots);
    let mut ky = Vec::with_capacity(knots);
    for k in 0..knots {
        if wsums[k] > 0.0 {
            kx.push(lo + span * k as f64 / (knots - 1) as f64);
            ky.push(sums[k] / wsums[k]);
        }
    }
    (kx.len() >= 2).then(|| spline_through(wave, &kx, &ky))
}

#[cfg(test)]
mod continuum_test {
    use super::*;
    use approx::assert_relative_eq;

    fn spectra_with_slope() -> (Spectrum, Spectrum, Vec<f64>) {
        let wave: Vec<f64> = (0..32).map(|i| 4000.0 + i as f64 * 10.0).collect();
        let synthetic = Spectrum::new(wave.clone(), vec![1.0; wave.len()]).unwrap();
        // observed continuum is a linear ramp of the synthetic
        let obs_flux: Vec<f64> = wave.iter().map(|w| 2.0 + 0.001 * (w - 4000.0)).collect();
        let observed = Spectrum::new(wave.clone(), obs_flux).unwrap();
        let weights = vec![1.0; wave.len()];
        (synthetic, observed, weights)
    }

    #[test]
    fn polynomial_recovers_linear_ramp() {
        let (synthetic, observed, weights) = spectra_with_slope();
        let model = ContinuumModel::Polynomial { degree: 3 };
        let out = model.fit_and_apply(&synthetic, &observed, &weights).unwrap();
        for (f, o) in out.flux().iter().zip(observed.flux()) {
            assert_relative_eq!(f, o, epsilon = 1e-8);
        }
    }

    #[test]
    fn additive_polynomial_recovers_offset() {
        let (synthetic, observed, weights) = spectra_with_slope();
        let model = ContinuumModel::AdditivePolynomial { degree: 1 };
        let out = model.fit_and_apply(&synthetic, &observed, &weights).unwrap();
        for (f, o) in out.flux().iter().zip(observed.flux()) {
            assert_relative_eq!(f, o, epsilon = 1e-8);
        }
    }

    #[test]
    fn none_variant_is_identity() {
        let (synthetic, observed, weights) = spectra_with_slope();
        let out = ContinuumModel::None
            .fit_and_apply(&synthetic, &observed, &weights)
            .unwrap();
        assert_eq!(out.flux(), synthetic.flux());
    }

    #[test]
    fn peak_to_peak_ignores_absorption_dips() {
        let wave: Vec<f64> = (0..64).map(|i| 4000.0 + i as f64 * 5.0).collect();
        let synthetic = Spectrum::new(wave.clone(), vec![1.0; wave.len()]).unwrap();
        // flat continuum at 2.0 with two deep absorption lines
        let mut obs_flux = vec![2.0; wave.len()];
        obs_flux[20] = 0.4;
        obs_flux[45] = 0.2;
        let observed = Spectrum::new(wave.clone(), obs_flux).unwrap();
        let weights = vec![1.0; wave.len()];

        let model = ContinuumModel::PeakToPeak { bins: 8 };
        let out = model.fit_and_apply(&synthetic, &observed, &weights).unwrap();
        // away from the lines the envelope must sit at the true continuum
        assert_relative_eq!(out.flux()[5], 2.0, epsilon = 1e-6);
        assert_relative_eq!(out.flux()[60], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn degree_degrades_when_pixels_are_scarce() {
        let wave = vec![4000.0, 4010.0, 4020.0];
        let synthetic = Spectrum::new(wave.clone(), vec![1.0; 3]).unwrap();
        let observed = Spectrum::new(wave.clone(), vec![3.0; 3]).unwrap();
        let model = ContinuumModel::Polynomial { degree: 40 };
        let out = model
            .fit_and_apply(&synthetic, &observed, &[1.0, 1.0, 1.0])
            .unwrap();
        for f in out.flux() {
            assert_relative_eq!(*f, 3.0, epsilon = 1e-8);
        }
    }
}

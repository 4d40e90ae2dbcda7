use std::sync::Arc;

use specfit::{GridAxis, Parameter, ParameterVector, SpectralGrid, Spectrum};

pub const WAVE_START: f64 = 4000.0;
pub const WAVE_STEP: f64 = 2.0;
pub const NPIX: usize = 200;

pub fn test_wave() -> Vec<f64> {
    (0..NPIX).map(|i| WAVE_START + WAVE_STEP * i as f64).collect()
}

/// Synthetic flux field, linear in both parameters with orthogonal
/// signatures: temperature tilts the spectrum around its midpoint, gravity
/// shifts the whole level. Interpolation reproduces it exactly between nodes
/// and a fit of (teff, logg) has a unique minimum.
pub fn field_flux(wave: &[f64], teff: f64, logg: f64) -> Vec<f64> {
    let mid = WAVE_START + WAVE_STEP * (NPIX - 1) as f64 / 2.0;
    wave.iter()
        .map(|w| 4.0 - 0.5 * logg + 4e-4 * teff * (w - mid) / 1000.0)
        .collect()
}

/// 4x3 (teff, logg) grid over the synthetic field.
pub fn linear_grid() -> Arc<SpectralGrid> {
    let axes = vec![
        GridAxis::new("teff", vec![5000.0, 5500.0, 6000.0, 6500.0]).unwrap(),
        GridAxis::new("logg", vec![4.0, 4.5, 5.0]).unwrap(),
    ];
    let wave = test_wave();
    let grid = SpectralGrid::from_loader(axes, |c| {
        Spectrum::new(wave.clone(), field_flux(&wave, c[0], c[1])).ok()
    })
    .unwrap();
    Arc::new(grid)
}

/// Narrow Gaussian absorption profile, peaking at 1 on `center`.
fn line_profile(w: f64, center: f64, width: f64) -> f64 {
    (-((w - center) / width).powi(2)).exp()
}

/// Flux field with two absorption lines instead of smooth trends:
/// temperature sets the depth of the 4120 A line, gravity the depth of the
/// 4260 A line. Low-order continuum polynomials cannot absorb either
/// signature, and the field stays linear in both parameters per pixel.
pub fn lined_flux(wave: &[f64], teff: f64, logg: f64) -> Vec<f64> {
    wave.iter()
        .map(|w| {
            let l1 = line_profile(*w, 4120.0, 6.0);
            let l2 = line_profile(*w, 4260.0, 6.0);
            5.0 - 2e-4 * teff * l1 - 0.4 * logg * l2
        })
        .collect()
}

/// Same 4x3 (teff, logg) layout as [`linear_grid`], over the lined field.
pub fn lined_grid() -> Arc<SpectralGrid> {
    let axes = vec![
        GridAxis::new("teff", vec![5000.0, 5500.0, 6000.0, 6500.0]).unwrap(),
        GridAxis::new("logg", vec![4.0, 4.5, 5.0]).unwrap(),
    ];
    let wave = test_wave();
    let grid = SpectralGrid::from_loader(axes, |c| {
        Spectrum::new(wave.clone(), lined_flux(&wave, c[0], c[1])).ok()
    })
    .unwrap();
    Arc::new(grid)
}

/// Noiseless observation drawn from the same field, off the grid nodes.
pub fn observation_at(teff: f64, logg: f64) -> Spectrum {
    let wave = test_wave();
    let flux = field_flux(&wave, teff, logg);
    Spectrum::new(wave.clone(), flux)
        .unwrap()
        .with_sigma(vec![0.01; wave.len()])
        .unwrap()
}

pub fn initial(teff: f64, logg: f64) -> ParameterVector {
    [Parameter::new("teff", teff), Parameter::new("logg", logg)]
        .into_iter()
        .collect()
}

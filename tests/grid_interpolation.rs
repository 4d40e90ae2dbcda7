mod common;

use approx::assert_relative_eq;
use common::{field_flux, initial, linear_grid, test_wave};
use specfit::{GridInterpolator, SpecfitError};

#[test]
fn grid_nodes_are_reproduced_exactly() {
    let interp = GridInterpolator::new(linear_grid());
    let wave = test_wave();

    for &teff in &[5000.0, 5500.0, 6000.0, 6500.0] {
        for &logg in &[4.0, 4.5, 5.0] {
            let spec = interp.interpolate(&initial(teff, logg)).unwrap();
            let expected = field_flux(&wave, teff, logg);
            for (f, e) in spec.flux().iter().zip(&expected) {
                assert_relative_eq!(*f, *e, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn linear_field_is_exact_between_nodes() {
    let interp = GridInterpolator::new(linear_grid());
    let wave = test_wave();

    let spec = interp.interpolate(&initial(5800.0, 4.7)).unwrap();
    let expected = field_flux(&wave, 5800.0, 4.7);
    for (f, e) in spec.flux().iter().zip(&expected) {
        assert_relative_eq!(*f, *e, epsilon = 1e-9);
    }
}

#[test]
fn clamped_interpolation_stays_within_sample_range() {
    let grid = linear_grid();
    let interp = GridInterpolator::new(grid.clone()).with_overshoot_margin(Some(0.0));

    let spec = interp.interpolate(&initial(5650.0, 4.2)).unwrap();
    for (k, f) in spec.flux().iter().enumerate() {
        // every pixel must lie inside the range spanned by the stored corners
        let corners: Vec<f64> = [5500.0, 6000.0]
            .iter()
            .flat_map(|t| [4.0, 4.5].iter().map(move |g| (*t, *g)))
            .map(|(t, g)| grid.get(&[t, g]).unwrap().flux()[k])
            .collect();
        let lo = corners.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(*f >= lo - 1e-12 && *f <= hi + 1e-12);
    }
}

#[test]
fn out_of_range_request_names_the_axis() {
    let interp = GridInterpolator::new(linear_grid());
    let err = interp.interpolate(&initial(7000.0, 4.5)).unwrap_err();
    match err {
        SpecfitError::OutOfGridRange { axis, min, max, value } => {
            assert_eq!(axis, "teff");
            assert_eq!(min, 5000.0);
            assert_eq!(max, 6500.0);
            assert_eq!(value, 7000.0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn extrapolation_tolerance_widens_the_bounds() {
    let interp = GridInterpolator::new(linear_grid()).with_extrapolation_tolerance(0.1);
    // 6540 is within a tenth of the 500 K edge cell
    assert!(interp.interpolate(&initial(6540.0, 4.5)).is_ok());
    assert!(interp.interpolate(&initial(6560.0, 4.5)).is_err());
}

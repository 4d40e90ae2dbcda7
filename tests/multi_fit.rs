mod common;

use approx::assert_relative_eq;
use common::{initial, linear_grid, observation_at};
use specfit::{
    BatchFit, Component, ContinuumModel, FitParams, GridInterpolator, MultiFit, ParamsFit,
    TargetSet,
};

fn no_continuum_params() -> FitParams {
    FitParams::builder()
        .continuum(ContinuumModel::None)
        .build()
        .unwrap()
}

#[test]
fn single_component_matches_params_fit() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();

    let observed = observation_at(5800.0, 4.7);
    let init = initial(5500.0, 4.5);

    let single = ParamsFit::new(&interp, &params)
        .fit(&observed, &init, &["teff", "logg"])
        .unwrap();

    let driver = MultiFit::new(&interp, &params);
    let comps = [Component::new("star", init.clone(), &["teff", "logg"])];
    let multi = driver.fit(&observed, &comps).unwrap();

    assert!(multi.converged);
    assert!(multi.success);
    assert!(multi.damping_factor.is_none());
    let star = &multi.components[0];
    assert_relative_eq!(
        star.params.value("teff").unwrap(),
        single.params.value("teff").unwrap(),
        epsilon = 1e-6
    );
    assert_relative_eq!(
        star.params.value("logg").unwrap(),
        single.params.value("logg").unwrap(),
        epsilon = 1e-9
    );
    assert_relative_eq!(star.reduced_chi2, single.reduced_chi2, epsilon = 1e-12);
}

#[test]
fn two_additive_components_are_separated() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();
    let driver = MultiFit::new(&interp, &params);

    // composite of two sources with orthogonal free parameters: the first
    // component's temperature sets the tilt, the second's gravity the level
    let mut composite = observation_at(5200.0, 4.2);
    composite.shift_by(observation_at(6300.0, 4.9).flux());

    let comps = [
        Component::new("primary", initial(5400.0, 4.2), &["teff"]),
        Component::new("secondary", initial(6300.0, 4.6), &["logg"]),
    ];
    let result = driver.fit(&composite, &comps).unwrap();

    assert!(result.converged, "no convergence after {} passes", result.passes);
    assert!(result.success);
    assert_relative_eq!(
        result.components[0].params.value("teff").unwrap(),
        5200.0,
        epsilon = 1e-2
    );
    assert_relative_eq!(
        result.components[1].params.value("logg").unwrap(),
        4.9,
        epsilon = 1e-5
    );
    // fixed parameters never move
    assert_eq!(result.components[0].params.value("logg").unwrap(), 4.2);
    assert_eq!(result.components[1].params.value("teff").unwrap(), 6300.0);
}

#[test]
fn polynomial_continuum_preserves_component_separation() {
    let interp = GridInterpolator::new(common::lined_grid());
    let params = FitParams::builder()
        .continuum(ContinuumModel::Polynomial { degree: 2 })
        .build()
        .unwrap();
    let driver = MultiFit::new(&interp, &params);

    // additive composite over the lined field: the primary's temperature is
    // encoded in one line, the secondary's gravity in the other
    let wave = common::test_wave();
    let mut flux = common::lined_flux(&wave, 5200.0, 4.2);
    for (f, b) in flux.iter_mut().zip(common::lined_flux(&wave, 6300.0, 4.9)) {
        *f += b;
    }
    let composite = specfit::Spectrum::new(wave.clone(), flux)
        .unwrap()
        .with_sigma(vec![0.01; wave.len()])
        .unwrap();

    let comps = [
        Component::new("primary", initial(5300.0, 4.2), &["teff"]),
        Component::new("secondary", initial(6300.0, 4.75), &["logg"]),
    ];
    let result = driver.fit(&composite, &comps).unwrap();

    assert!(result.converged, "no convergence after {} passes", result.passes);
    assert!(result.success);
    // recovery within the default per-parameter thresholds, with the
    // continuum correction active on every component fit
    let teff = result.components[0].params.value("teff").unwrap();
    let logg = result.components[1].params.value("logg").unwrap();
    assert!((teff - 5200.0).abs() < 25.0, "teff drifted to {teff}");
    assert!((logg - 4.9).abs() < 0.05, "logg drifted to {logg}");
    // neither component may sit pinned at an axis bound
    assert!(teff > 5000.0 + 1.0 && teff < 6500.0 - 1.0);
    assert!(logg > 4.0 + 0.01 && logg < 5.0 - 0.01);
}

#[test]
fn single_pass_skips_convergence_checking() {
    let interp = GridInterpolator::new(linear_grid());
    let params = FitParams::builder()
        .continuum(ContinuumModel::None)
        .max_passes(1)
        .build()
        .unwrap();
    let driver = MultiFit::new(&interp, &params);

    let observed = observation_at(5800.0, 4.7);
    let comps = [Component::new("star", initial(5500.0, 4.5), &["teff", "logg"])];
    let result = driver.fit(&observed, &comps).unwrap();

    assert_eq!(result.passes, 1);
    assert!(result.success);
    assert!(result.converged);
}

#[test]
fn cancellation_returns_partial_result() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();
    let driver = MultiFit::new(&interp, &params);

    let observed = observation_at(5800.0, 4.7);
    let comps = [Component::new("star", initial(5500.0, 4.5), &["teff", "logg"])];
    let result = driver
        .fit_with_cancel(&observed, &comps, || true)
        .unwrap();

    assert!(result.cancelled);
    assert!(!result.converged);
    assert_eq!(result.passes, 1);
    // the pass that ran still updated the component
    assert_relative_eq!(
        result.components[0].params.value("teff").unwrap(),
        5800.0,
        epsilon = 1e-3
    );
}

#[test]
fn empty_component_list_is_rejected() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();
    let driver = MultiFit::new(&interp, &params);
    let observed = observation_at(5800.0, 4.7);
    assert!(driver.fit(&observed, &[]).is_err());
}

#[test]
fn batch_fit_collects_every_target() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();

    let mut targets = TargetSet::default();
    targets.insert("a".to_string(), observation_at(5300.0, 4.2));
    targets.insert("b".to_string(), observation_at(6100.0, 4.8));

    let comps = [Component::new("star", initial(5750.0, 4.5), &["teff", "logg"])];
    let results = targets.fit_all(&interp, &params, &comps);

    assert_eq!(results.len(), 2);
    let a = results["a"].as_ref().unwrap();
    assert!(a.success);
    assert_relative_eq!(
        a.components[0].params.value("teff").unwrap(),
        5300.0,
        epsilon = 1e-2
    );
    let b = results["b"].as_ref().unwrap();
    assert_relative_eq!(
        b.components[0].params.value("logg").unwrap(),
        4.8,
        epsilon = 1e-5
    );
}

#[test]
fn parallel_batch_matches_sequential() {
    let interp = GridInterpolator::new(linear_grid());
    let params = no_continuum_params();

    let mut targets = TargetSet::default();
    targets.insert("a".to_string(), observation_at(5300.0, 4.2));
    targets.insert("b".to_string(), observation_at(6100.0, 4.8));

    let comps = [Component::new("star", initial(5750.0, 4.5), &["teff", "logg"])];
    let seq = targets.fit_all(&interp, &params, &comps);
    let par = targets.par_fit_all(&interp, &params, &comps);

    assert_eq!(seq.len(), par.len());
    for (id, outcome) in &seq {
        let other = par[id].as_ref().unwrap();
        let this = outcome.as_ref().unwrap();
        assert_relative_eq!(
            this.components[0].params.value("teff").unwrap(),
            other.components[0].params.value("teff").unwrap(),
            epsilon = 1e-9
        );
    }
}

//! Calibration tests on synthetic scenes: recover known intrinsics and
//! orientation from star cross-matches.


use std::cell::RefCell;

use geocal::coords::cam_pointing;
use geocal::{
    calibrate_camera, CalibrationConfig, CalibrationRecord, CameraModel, Correspondence,
    Distortion, Exclusion, FitError, GeoCalFitter, JacobianMode, LevenbergMarquardtSolver,
    RadialDistortion, ReferenceStar, ResidualModel, Source,
};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use synthetic_scene::{angle_between, perturb, pixel_grid, Scene};

fn true_camera() -> CameraModel {
    CameraModel {
        fi: 1100.0,
        fj: 1085.0,
        pi: 652.0,
        pj: 471.0,
        width: 1280,
        height: 960,
        distortion: Distortion::None,
    }
}

/// Nominal camera from the lens and sensor data sheet.
fn nominal_camera() -> CameraModel {
    CameraModel::from_physical(5.7, 0.0052, 0.0052, 1280, 960)
}

#[test]
fn test_noiseless_calibration_recovers_truth() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = Scene::new(true_camera());
    let xms = scene.correspondences(&pixel_grid(1280, 960, 5, 4));
    let q0 = perturb(&scene.q_sez_cam, 1f64.to_radians());

    let config = CalibrationConfig {
        max_iterations: 200,
        ..Default::default()
    };
    let result =
        calibrate_camera(&nominal_camera(), &q0, &xms, scene.gmst, &scene.site, &config).unwrap();

    assert!(result.converged, "status {:?}", result.status);
    assert_eq!(result.num_used, 20);
    assert!(
        result.rms_after_px < 1e-6,
        "noiseless fit should reproduce the data, RMS {:.3e} px",
        result.rms_after_px
    );
    assert!(result.rms_before_px > 5.0, "initial guess too close to be a test");

    let truth = true_camera();
    for (name, fitted, expected) in [
        ("fi", result.camera.fi, truth.fi),
        ("fj", result.camera.fj, truth.fj),
        ("pi", result.camera.pi, truth.pi),
        ("pj", result.camera.pj, truth.pj),
    ] {
        assert!(
            (fitted - expected).abs() < 1e-4,
            "{}: expected {}, got {}",
            name,
            expected,
            fitted
        );
    }

    let err = angle_between(&result.q_sez_cam, &scene.q_sez_cam);
    assert!(err < 1e-7, "orientation error {:.3e} rad", err);

    let (az, el, roll) = cam_pointing(&result.q_sez_cam);
    assert!((az.to_degrees() - 135.0).abs() < 1e-5, "az {}", az.to_degrees());
    assert!((el.to_degrees() - 35.0).abs() < 1e-5, "el {}", el.to_degrees());
    assert!((roll - 0.05).abs() < 1e-7, "roll {}", roll);
}

#[test]
fn test_six_stars_two_degree_error() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = Scene::new(true_camera());
    let pixels = [
        (150.0, 130.0),
        (1100.0, 160.0),
        (640.0, 480.0),
        (210.0, 820.0),
        (1150.0, 850.0),
        (700.0, 120.0),
    ];
    let mut rng = StdRng::seed_from_u64(7);
    let xms = scene.noisy_correspondences(&pixels, 0.1, &mut rng);

    let mut initial = true_camera();
    initial.fi *= 1.02;
    initial.fj *= 0.98;
    initial.pi += 10.0;
    initial.pj -= 8.0;
    let q0 = perturb(&scene.q_sez_cam, 2f64.to_radians());

    let config = CalibrationConfig {
        max_iterations: 50,
        pixel_sigma: 0.1,
        ..Default::default()
    };
    let result = calibrate_camera(&initial, &q0, &xms, scene.gmst, &scene.site, &config).unwrap();

    // N = 12, M = 8
    assert_eq!(result.params.len(), 8);
    assert_eq!(result.dof, 4);
    assert!(result.converged, "status {:?}", result.status);
    assert!(result.iterations <= 50);
    assert!(
        result.rms_after_px < 0.5,
        "RMS {:.3} px after {} iterations",
        result.rms_after_px,
        result.iterations
    );
    assert!(result.rms_before_px > 10.0);

    // χ² history is the solver's; the result must at least be consistent.
    assert!(result.chi2.is_finite());
    assert!(result.reduced_chi2.is_some());
}

#[test]
fn test_excluded_stars_never_reach_the_fit() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = Scene::new(true_camera());
    let mut xms = scene.correspondences(&pixel_grid(1280, 960, 4, 3));
    let n_good = xms.len();

    // Behind the camera, with a wildly wrong observed position.
    xms.insert(
        3,
        Correspondence::new(Source::new(-5000.0, 9000.0), scene.star_behind(100)),
    );
    // Fainter than the limit, with a wrong observed position.
    let mut faint = scene.star_at(101, 300.0, 300.0, 3.0);
    faint.mag = 7.5;
    xms.push(Correspondence::new(Source::new(900.0, 100.0), faint));

    let config = CalibrationConfig {
        faint_mag_limit: 6.0,
        max_iterations: 200,
        ..Default::default()
    };
    let q0 = perturb(&scene.q_sez_cam, 0.5f64.to_radians());
    let result =
        calibrate_camera(&true_camera(), &q0, &xms, scene.gmst, &scene.site, &config).unwrap();

    assert_eq!(result.num_used, n_good);
    assert_eq!(
        result.excluded,
        vec![(3, Exclusion::BehindCamera), (n_good + 1, Exclusion::TooFaint)]
    );
    assert!(result.residuals.iter().all(|&(idx, _, _)| idx != 3 && idx != n_good + 1));
    assert!(
        result.rms_after_px < 1e-6,
        "excluded stars leaked into the fit: RMS {:.3e} px",
        result.rms_after_px
    );
}

#[test]
fn test_underdetermined_is_a_configuration_error() {
    let scene = Scene::new(true_camera());
    // 3 stars → N = 6; pinhole + 3 radial terms + quaternion → M = 11
    let xms = scene.correspondences(&[(100.0, 100.0), (600.0, 500.0), (1000.0, 800.0)]);
    let camera = true_camera().with_distortion(Distortion::Radial(RadialDistortion::with_terms(3)));

    let err = calibrate_camera(
        &camera,
        &scene.q_sez_cam,
        &xms,
        scene.gmst,
        &scene.site,
        &CalibrationConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, FitError::Underdetermined { n: 6, m: 11 });
}

#[test]
fn test_all_excluded_is_an_error() {
    let scene = Scene::new(true_camera());
    let xms = vec![Correspondence::new(
        Source::new(10.0, 10.0),
        ReferenceStar::new(1, 0.0, 0.0, 9.0),
    )];
    let config = CalibrationConfig {
        faint_mag_limit: 6.0,
        ..Default::default()
    };
    let err = calibrate_camera(
        &true_camera(),
        &scene.q_sez_cam,
        &xms,
        scene.gmst,
        &scene.site,
        &config,
    )
    .unwrap_err();
    assert_eq!(err, FitError::NoCorrespondences);
}

/// Records the quaternion norm seen by every model evaluation.
struct NormRecorder<'a> {
    inner: &'a GeoCalFitter,
    q_offset: usize,
    norms: RefCell<Vec<f64>>,
}

impl ResidualModel for NormRecorder<'_> {
    fn model(&self, params: &DVector<f64>, out: &mut DVector<f64>) {
        self.norms
            .borrow_mut()
            .push(params.rows(self.q_offset, 4).norm());
        self.inner.model(params, out);
    }

    // No `jacobian` override: the default forward difference routes every
    // perturbed evaluation through `model` above.

    fn finite_difference_steps(&self, params: &DVector<f64>) -> DVector<f64> {
        self.inner.finite_difference_steps(params)
    }

    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        self.inner.post_parameter_update(params);
    }
}

#[test]
fn test_quaternion_is_unit_at_every_evaluation() {
    let scene = Scene::new(true_camera());
    let mut rng = StdRng::seed_from_u64(11);
    let xms = scene.noisy_correspondences(&pixel_grid(1280, 960, 4, 4), 0.3, &mut rng);
    let q0 = perturb(&scene.q_sez_cam, 3f64.to_radians());

    let fitter =
        GeoCalFitter::new(nominal_camera(), q0, &xms, scene.gmst, &scene.site, 6.0).unwrap();
    let (m, n) = (fitter.num_params(), fitter.num_data());
    let recorder = NormRecorder {
        inner: &fitter,
        q_offset: m - 4,
        norms: RefCell::new(Vec::new()),
    };

    // Start from a deliberately non-unit quaternion.
    let mut p0 = fitter.initial_parameters();
    for q in &mut p0[m - 4..] {
        *q *= 2.5;
    }

    let mut lm = LevenbergMarquardtSolver::new(&recorder, m, n);
    lm.set_data(fitter.observed()).unwrap();
    lm.set_parameters(&p0).unwrap();
    lm.set_variance(&vec![0.09; n]).unwrap();
    assert!(lm.fit(100, false).unwrap());

    let norms = recorder.norms.borrow();
    assert!(norms.len() > 10, "only {} evaluations", norms.len());
    for (k, norm) in norms.iter().enumerate() {
        assert!(
            (norm - 1.0).abs() < 1e-12,
            "evaluation {}: quaternion norm {}",
            k,
            norm
        );
    }
    let p = lm.parameters();
    assert!((p.rows(m - 4, 4).norm() - 1.0).abs() < 1e-12);
}

#[test]
fn test_radial_distortion_recovered() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut truth = true_camera();
    truth.distortion = Distortion::Radial(RadialDistortion {
        k1: -0.08,
        k2: 0.012,
        k3: 0.0,
        terms: 2,
    });
    let scene = Scene::new(truth.clone());
    let xms = scene.correspondences(&pixel_grid(1280, 960, 7, 5));

    let initial = true_camera().with_distortion(Distortion::Radial(RadialDistortion::with_terms(2)));
    let q0 = perturb(&scene.q_sez_cam, 0.5f64.to_radians());
    let config = CalibrationConfig {
        max_iterations: 200,
        ..Default::default()
    };
    let result = calibrate_camera(&initial, &q0, &xms, scene.gmst, &scene.site, &config).unwrap();

    assert!(result.converged);
    assert_eq!(result.param_names, vec!["fi", "fj", "pi", "pj", "k1", "k2", "qw", "qx", "qy", "qz"]);
    assert!(result.rms_after_px < 1e-6, "RMS {:.3e} px", result.rms_after_px);
    let Distortion::Radial(r) = &result.camera.distortion else {
        panic!("distortion model lost");
    };
    assert!((r.k1 + 0.08).abs() < 1e-7, "k1 = {}", r.k1);
    assert!((r.k2 - 0.012).abs() < 1e-7, "k2 = {}", r.k2);
    assert!((result.camera.fi - truth.fi).abs() < 1e-4);
}

#[test]
fn test_finite_difference_jacobian_reaches_same_solution() {
    let scene = Scene::new(true_camera());
    let mut rng = StdRng::seed_from_u64(3);
    let xms = scene.noisy_correspondences(&pixel_grid(1280, 960, 5, 4), 0.5, &mut rng);
    let q0 = perturb(&scene.q_sez_cam, 1f64.to_radians());

    let run = |mode: JacobianMode| {
        let config = CalibrationConfig {
            jacobian: mode,
            pixel_sigma: 0.5,
            max_iterations: 200,
            ..Default::default()
        };
        calibrate_camera(&nominal_camera(), &q0, &xms, scene.gmst, &scene.site, &config).unwrap()
    };

    let analytic = run(JacobianMode::Analytic);
    for mode in [JacobianMode::ForwardDifference, JacobianMode::CentralDifference] {
        let numeric = run(mode);
        assert!(numeric.converged, "{:?}: {:?}", mode, numeric.status);
        assert!(
            (numeric.rms_after_px - analytic.rms_after_px).abs() < 1e-6,
            "{:?}: RMS {} vs analytic {}",
            mode,
            numeric.rms_after_px,
            analytic.rms_after_px
        );
        for (k, (a, b)) in analytic.params.iter().zip(&numeric.params).enumerate() {
            assert!(
                (a - b).abs() < 1e-3 * a.abs().max(1.0),
                "{:?}: {} analytic {} vs numeric {}",
                mode,
                analytic.param_names[k],
                a,
                b
            );
        }
    }
}

#[test]
fn test_source_covariances_weight_the_fit() {
    let scene = Scene::new(true_camera());
    let mut rng = StdRng::seed_from_u64(5);
    let mut xms = scene.noisy_correspondences(&pixel_grid(1280, 960, 5, 4), 0.2, &mut rng);
    for c in &mut xms {
        c.source.cov = Some(nalgebra::Matrix2::new(0.04, 0.01, 0.01, 0.05));
    }

    let q0 = perturb(&scene.q_sez_cam, 1f64.to_radians());
    let result = calibrate_camera(
        &nominal_camera(),
        &q0,
        &xms,
        scene.gmst,
        &scene.site,
        &CalibrationConfig::default(),
    )
    .unwrap();
    assert!(result.converged);

    // Unit pixel_sigma would give χ²_ν ≈ 0.04; the per-source covariance gives ≈ 1.
    let rc = result.reduced_chi2.unwrap();
    assert!(rc > 0.2 && rc < 5.0, "reduced chi2 {}", rc);

    let cov: &DMatrix<f64> = result.covariance.as_ref().unwrap();
    assert_eq!(cov.nrows(), 8);
    let se = result.standard_errors.as_ref().unwrap();
    assert!(se[0] > 0.0 && se[0] < 5.0, "sigma(fi) = {}", se[0]);
}

#[test]
fn test_record_roundtrip() {
    let scene = Scene::new(true_camera());
    let xms = scene.correspondences(&pixel_grid(1280, 960, 4, 4));
    let result = calibrate_camera(
        &nominal_camera(),
        &perturb(&scene.q_sez_cam, 1f64.to_radians()),
        &xms,
        scene.gmst,
        &scene.site,
        &CalibrationConfig::default(),
    )
    .unwrap();

    let record = CalibrationRecord::from_result(&result, synthetic_scene::EPOCH_US, &scene.site);
    let path = std::env::temp_dir().join(format!("geocal_record_{}.rkyv", std::process::id()));
    let path = path.to_str().unwrap();
    record.save_to_file(path).unwrap();
    let loaded = CalibrationRecord::load_from_file(path).unwrap();
    let _ = std::fs::remove_file(path);

    assert_eq!(loaded, record);
    assert_eq!(loaded.camera(), result.camera);
    assert!(angle_between(&loaded.orientation(), &result.q_sez_cam) < 1e-12);
    assert_eq!(loaded.param_names.len(), loaded.standard_errors.len());
}

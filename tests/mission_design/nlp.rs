extern crate pretty_env_logger;

use approx::assert_abs_diff_eq;
use rstest::*;
use trajest::linalg::{DMatrix, DVector};
use trajest::md::prelude::*;
use trajest::od::ExtendedKalmanFilter;
use trajest::sim::{simulate, MeasurementSimulator};

const SIGMA: f64 = 0.1;

fn t0() -> Epoch {
    Epoch::from_tai_seconds(0.0)
}

fn control() -> DVector<f64> {
    DVector::from_vec(vec![1.0, -0.5])
}

/// Fifty samples over ten seconds of a planar single integrator with a constant velocity.
fn samples() -> (Vec<Epoch>, Vec<DVector<f64>>, Trajectory) {
    let times: Vec<Epoch> = (0..50)
        .map(|i| t0() + (10.0 * i as f64 / 49.0).seconds())
        .collect();
    let controls = vec![control(); times.len()];
    let truth = simulate(
        &SingleIntegrator::new(2),
        &DVector::zeros(2),
        &times,
        &controls,
        &(),
    )
    .unwrap();
    (times, controls, truth)
}

#[fixture]
fn nlp() -> FixedTimeEstimationNlp {
    FixedTimeEstimationNlp::new(20, t0(), t0() + 10.seconds(), 2, 2).unwrap()
}

/// The smoother recovers the trajectory from noisy samples which are not on the node grid.
#[rstest]
fn nlp_noisy_samples(mut nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    let (times, controls, truth) = samples();
    let mut sim = MeasurementSimulator::new(FullState::new(2), &[SIGMA; 2], 42).unwrap();
    let measurements = sim.measure_trajectory(&truth, &[()]).unwrap();

    let x = nlp.add_variables("x", 21, 2).unwrap();
    nlp.add_dynamics(
        SingleIntegrator::new(2),
        &x,
        &times,
        &controls,
        &DMatrix::from_diagonal_element(2, 2, 1.0 / 1e-2),
        (),
    )
    .unwrap();
    nlp.add_residual_cost(
        FullState::new(2),
        &x,
        &times,
        &measurements,
        &DMatrix::from_diagonal_element(2, 2, 1.0 / SIGMA.powi(2)),
        &[()],
    )
    .unwrap();
    nlp.build().unwrap();

    let problem = nlp.problem().unwrap();
    assert_eq!(problem.num_params(), 42);
    assert_eq!(problem.num_residuals(), 20 * 2 + 50 * 2);

    let report = nlp.solve().unwrap();
    println!("{report}");
    assert!(report.total_cost().is_finite());
    assert_eq!(nlp.report(), Some(&report));

    let estimate = nlp.extract_solution("x", &times).unwrap();
    assert_eq!(estimate.len(), 50);
    assert_eq!(estimate.name.as_deref(), Some("x"));

    let errors: Vec<f64> = estimate
        .states()
        .iter()
        .zip(truth.states())
        .map(|(est, tru)| (est - tru).norm())
        .collect();
    let rms = estimate.rms_error(&truth).unwrap();
    let max = errors.iter().copied().fold(0.0, f64::max);
    println!("RMS error {rms:.4}, max error {max:.4}");
    assert!(rms < 0.4);
    assert!(max < 1.0);

    let nodes = nlp.extract_nodes("x").unwrap();
    assert_eq!(nodes.len(), 21);
    assert_eq!(nodes.epochs(), nlp.nodes());

    // Same data through the filter
    let mut ekf = ExtendedKalmanFilter::new(
        SingleIntegrator::new(2),
        FullState::new(2),
        times[0],
        measurements[0].clone(),
        DMatrix::from_diagonal_element(2, 2, SIGMA.powi(2)),
    )
    .unwrap();
    let r = sim.noise_covariance();
    for i in 1..times.len() {
        let dt = (times[i] - times[i - 1]).to_seconds();
        let q = DMatrix::from_diagonal_element(2, 2, 1e-2 * dt);
        ekf.update(times[i], &controls[i - 1], &measurements[i], &q, &r, &(), &())
            .unwrap();
    }
    let ekf_rms = ekf.trajectory().unwrap().rms_error(&truth).unwrap();
    println!("EKF RMS error {ekf_rms:.4}");
    assert!(ekf_rms < 0.4);
}

/// Planar single integrator driven by `u(t) = (sin t, cos t)` from the origin, sampled 50 times
/// over ten seconds and measured with a noise covariance of `diag(0.01, 0.02)`.
///
/// With one node per sample the smoother beats the raw measurements. With coarser nodes, the error
/// is dominated by the binding of each sample to its nearest node.
#[rstest]
#[case(20, 0.35, false)]
#[case(49, 0.1, true)]
fn nlp_sine_control_scenario(
    #[case] horizon: usize,
    #[case] max_rms: f64,
    #[case] beats_raw: bool,
) {
    let _ = pretty_env_logger::try_init();

    let times: Vec<Epoch> = (0..50)
        .map(|i| t0() + (10.0 * i as f64 / 49.0).seconds())
        .collect();
    let controls: Vec<DVector<f64>> = times
        .iter()
        .map(|epoch| {
            let t = (*epoch - t0()).to_seconds();
            DVector::from_vec(vec![t.sin(), t.cos()])
        })
        .collect();
    let truth = simulate(
        &SingleIntegrator::new(2),
        &DVector::zeros(2),
        &times,
        &controls,
        &(),
    )
    .unwrap();

    let msr_covar = DMatrix::from_diagonal(&DVector::from_vec(vec![0.01, 0.02]));
    let mut sim =
        MeasurementSimulator::new(FullState::new(2), &[0.01_f64.sqrt(), 0.02_f64.sqrt()], 2024)
            .unwrap();
    let measurements = sim.measure_trajectory(&truth, &[()]).unwrap();

    let mut nlp = FixedTimeEstimationNlp::new(horizon, t0(), t0() + 10.seconds(), 2, 2).unwrap();
    let x = nlp.add_variables("x", horizon + 1, 2).unwrap();
    let process_noise = DMatrix::from_diagonal(&DVector::from_vec(vec![1e-4, 1e-4]));
    nlp.add_dynamics(
        SingleIntegrator::new(2),
        &x,
        &times,
        &controls,
        &process_noise.try_inverse().unwrap(),
        (),
    )
    .unwrap();
    nlp.add_residual_cost(
        FullState::new(2),
        &x,
        &times,
        &measurements,
        &msr_covar.try_inverse().unwrap(),
        &[()],
    )
    .unwrap();
    nlp.build().unwrap();
    let report = nlp.solve().unwrap();
    println!("{report}");

    let estimate = nlp.extract_solution("x", &times).unwrap();
    let rms = estimate.rms_error(&truth).unwrap();
    let raw_rms = trajest::utils::rss_errors(&measurements, truth.states());
    println!("N = {horizon}: RMS error {rms:.4}, raw measurements {raw_rms:.4}");
    assert!(rms < max_rms, "{rms}");
    if beats_raw {
        assert!(rms < raw_rms, "{rms} >= {raw_rms}");
    }
}

/// Noise free measurements on every node are matched exactly.
#[rstest]
fn nlp_noise_free_nodes(mut nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    let nodes = nlp.nodes().to_vec();
    let controls = vec![control(); nodes.len()];
    let truth = simulate(
        &SingleIntegrator::new(2),
        &DVector::from_vec(vec![1.0, 1.0]),
        &nodes,
        &controls,
        &(),
    )
    .unwrap();

    let x = nlp.add_variables("x", 21, 2).unwrap();
    nlp.add_dynamics(
        SingleIntegrator::new(2),
        &x,
        &nodes,
        &controls,
        &DMatrix::identity(2, 2),
        (),
    )
    .unwrap();
    nlp.add_residual_cost(
        FullState::new(2),
        &x,
        &nodes,
        truth.states(),
        &DMatrix::identity(2, 2),
        &[()],
    )
    .unwrap();
    nlp.build().unwrap();
    let report = nlp.solve().unwrap();
    assert!(report.total_cost() < 1e-12);

    let estimate = nlp.extract_nodes("x").unwrap();
    for (est, tru) in estimate.states().iter().zip(truth.states()) {
        assert_abs_diff_eq!(est, tru, epsilon = 1e-6);
    }
}

/// Without any measurement, a pinned initial state and the dynamics fully determine the trajectory.
#[rstest]
fn nlp_pinned_start(mut nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    let x = nlp.add_variables("x", 21, 2).unwrap();
    nlp.add_dynamics(
        SingleIntegrator::new(2),
        &x,
        &[t0()],
        &[control()],
        &DMatrix::from_diagonal_element(2, 2, 100.0),
        (),
    )
    .unwrap();
    nlp.add_state_constraint(&x, 0, &DVector::from_vec(vec![5.0, 5.0]))
        .unwrap();
    nlp.build().unwrap();
    nlp.solve().unwrap();

    let nodes = nlp.extract_nodes("x").unwrap();
    assert_abs_diff_eq!(
        nodes.first().unwrap().1,
        &DVector::from_vec(vec![5.0, 5.0]),
        epsilon = 1e-6
    );
    assert_abs_diff_eq!(
        nodes.last().unwrap().1,
        &DVector::from_vec(vec![15.0, 0.0]),
        epsilon = 1e-4
    );
}

/// A bounded component stays within its bounds even when the measurements pull it out.
#[rstest]
fn nlp_state_bounds(mut nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    let nodes = nlp.nodes().to_vec();
    let measurements: Vec<DVector<f64>> = nodes
        .iter()
        .map(|epoch| {
            let t = (*epoch - t0()).to_seconds();
            DVector::from_vec(vec![t, -0.5 * t])
        })
        .collect();

    let x = nlp.add_variables("x", 21, 2).unwrap();
    nlp.add_residual_cost(
        FullState::new(2),
        &x,
        &nodes,
        &measurements,
        &DMatrix::from_diagonal_element(2, 2, 100.0),
        &[()],
    )
    .unwrap();
    nlp.add_state_bounds(&x, 0, -1.0, 5.0).unwrap();
    nlp.build().unwrap();
    let report = nlp.solve().unwrap();
    assert!(report.costs.constraint > 0.0);

    let estimate = nlp.extract_nodes("x").unwrap();
    for (state, msr) in estimate.states().iter().zip(&measurements) {
        assert!(state[0] <= 5.0 + 1e-3, "{}", state[0]);
        if msr[0] < 5.0 {
            assert_abs_diff_eq!(state[0], msr[0], epsilon = 1e-4);
        }
        // The other component is unaffected
        assert_abs_diff_eq!(state[1], msr[1], epsilon = 1e-4);
    }
}

/// Misuse of the problem is reported, and never corrupts it.
#[rstest]
fn nlp_lifecycle(mut nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    assert_eq!(nlp.solve(), Err(EstimationError::NotBuilt));

    let x = nlp.add_variables("x", 21, 2).unwrap();
    assert!(matches!(
        nlp.add_variables("x", 21, 2),
        Err(EstimationError::DuplicateVariable { .. })
    ));
    assert!(matches!(
        nlp.add_variables("y", 20, 2),
        Err(EstimationError::DimensionMismatch { .. })
    ));

    // Handle of another problem
    let mut other = FixedTimeEstimationNlp::new(20, t0(), t0() + 10.seconds(), 2, 2).unwrap();
    let foreign = other.add_variables("foreign", 21, 2).unwrap();
    assert!(matches!(
        nlp.add_state_constraint(&foreign, 0, &DVector::zeros(2)),
        Err(EstimationError::UnknownVariable { .. })
    ));

    // One step after the end is too far from the last node, a fifth of a step is close enough.
    let end = *nlp.nodes().last().unwrap();
    let msr = vec![DVector::zeros(2)];
    let weight = DMatrix::identity(2, 2);
    assert!(matches!(
        nlp.add_residual_cost(FullState::new(2), &x, &[end + nlp.step()], &msr, &weight, &[()]),
        Err(EstimationError::UnboundResidual { .. })
    ));
    nlp.add_residual_cost(FullState::new(2), &x, &[end + 0.1.seconds()], &msr, &weight, &[()])
        .unwrap();
    nlp.add_dynamics(
        SingleIntegrator::new(2),
        &x,
        &[t0()],
        &[DVector::zeros(2)],
        &weight,
        (),
    )
    .unwrap();

    assert!(matches!(
        nlp.extract_solution("x", &[t0()]),
        Err(EstimationError::NotSolved)
    ));

    nlp.build().unwrap();
    assert_eq!(nlp.build(), Err(EstimationError::AlreadyBuilt));
    assert_eq!(
        nlp.add_variables("z", 21, 2).unwrap_err(),
        EstimationError::AlreadyBuilt
    );
    assert_eq!(
        nlp.add_state_bounds(&x, 0, 0.0, 1.0),
        Err(EstimationError::AlreadyBuilt)
    );

    nlp.solve().unwrap();
    assert_eq!(nlp.solve(), Err(EstimationError::AlreadySolved));
    assert!(matches!(
        nlp.extract_solution("nope", &[t0()]),
        Err(EstimationError::UnknownVariable { .. })
    ));
    let last = nlp.extract_solution("x", &[end]).unwrap();
    assert_abs_diff_eq!(last.states()[0], DVector::zeros(2), epsilon = 1e-6);
}

/// A null time budget stops the solver immediately.
#[rstest]
fn nlp_time_budget(nlp: FixedTimeEstimationNlp) {
    let _ = pretty_env_logger::try_init();

    let mut nlp = nlp.with_config(
        NlpSolverConfig::builder()
            .max_duration(Some(Duration::ZERO))
            .build(),
    );
    let x = nlp.add_variables("x", 21, 2).unwrap();
    nlp.add_state_constraint(&x, 0, &DVector::from_vec(vec![1.0, 2.0]))
        .unwrap();
    nlp.build().unwrap();

    assert!(matches!(
        nlp.solve(),
        Err(EstimationError::NoConvergence { .. })
    ));
    assert!(nlp.report().is_none());
    assert_eq!(nlp.extract_nodes("x"), Err(EstimationError::NotSolved));
    assert_eq!(nlp.solve(), Err(EstimationError::AlreadySolved));
}

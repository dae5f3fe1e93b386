extern crate pretty_env_logger;

use approx::assert_abs_diff_eq;
use rstest::*;
use trajest::linalg::{DVector, Vector3};
use trajest::od::prelude::*;

fn noise_free(truth: &Vector3<f64>, bias: f64, refs: &[Vector3<f64>]) -> Vec<RangeObservation> {
    refs.iter()
        .map(|r| RangeObservation::new(*r, (truth - r).norm() + bias, 1.0))
        .collect()
}

/// Four reference points without any noise are enough to recover the position and the bias.
#[rstest]
#[case(LsqSolver::NormalEquations)]
#[case(LsqSolver::LevenbergMarquardt)]
fn lsq_noise_free_four_refs(#[case] solver: LsqSolver) {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(6_371e3, 1_000.0, -2_500.0);
    let bias = 85.0;
    let refs = crate::gnss_constellation();
    let obs = noise_free(&truth, bias, &refs[2..]);
    assert_eq!(obs.len(), 4);

    let lsq = IterativeLeastSquares::builder().solver(solver).build();
    let sol = lsq.solve_epoch(&obs, &DVector::zeros(4)).unwrap();
    println!("{sol}");

    assert_abs_diff_eq!(sol.position(), truth, epsilon = 1e-6);
    assert_abs_diff_eq!(sol.clock_bias(), bias, epsilon = 1e-6);
    assert!(sol.final_step_norm < 1e-6);
    assert!(sol.num_iterations <= 20);
    assert_eq!(sol.num_obs, 4);
    for i in 0..4 {
        assert!(sol.covariance[(i, i)] > 0.0);
    }
}

#[test]
fn lsq_three_obs_rank_deficient() {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(6_371e3, 0.0, 0.0);
    let obs = noise_free(&truth, 0.0, &crate::gnss_constellation()[..3]);
    assert_eq!(
        IterativeLeastSquares::default().solve_epoch(&obs, &DVector::zeros(4)),
        Err(EstimationError::RankDeficient {
            rank: 3,
            unknowns: 4
        })
    );
}

/// Collinear reference points do not constrain the position.
#[test]
fn lsq_degenerate_geometry() {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(0.0, 0.0, 0.0);
    let refs: Vec<Vector3<f64>> = (1..=5)
        .map(|i| Vector3::new(1e6 * i as f64, 0.0, 0.0))
        .collect();
    let obs = noise_free(&truth, 0.0, &refs);
    assert!(matches!(
        IterativeLeastSquares::default()
            .solve_epoch(&obs, &DVector::from_vec(vec![-10.0, 5.0, 5.0, 0.0])),
        Err(EstimationError::RankDeficient { .. })
    ));
}

/// The measurement weights scale the covariance.
#[test]
fn lsq_covariance_scaling() {
    let truth = Vector3::new(6_371e3, 0.0, 0.0);
    let obs = noise_free(&truth, 10.0, &crate::gnss_constellation());
    let wide: Vec<RangeObservation> = obs
        .iter()
        .map(|o| RangeObservation::new(o.reference, o.range, 2.0 * o.sigma))
        .collect();

    let lsq = IterativeLeastSquares::default();
    let guess = DVector::from_vec(vec![6_000e3, 0.0, 0.0, 0.0]);
    let narrow_sol = lsq.solve_epoch(&obs, &guess).unwrap();
    let wide_sol = lsq.solve_epoch(&wide, &guess).unwrap();
    assert_abs_diff_eq!(
        wide_sol.covariance,
        &narrow_sol.covariance * 4.0,
        epsilon = 1e-6 * narrow_sol.covariance.amax()
    );
}

#[test]
fn lsq_iteration_budget() {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(6_371e3, 0.0, 0.0);
    let obs = noise_free(&truth, 0.0, &crate::gnss_constellation());
    let lsq = IterativeLeastSquares::builder().max_iterations(1).build();
    assert!(matches!(
        lsq.solve_epoch(&obs, &DVector::zeros(4)),
        Err(EstimationError::NoConvergence { iterations: 1, .. })
    ));
}

#[test]
fn lsq_time_budget() {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(6_371e3, 0.0, 0.0);
    let obs = noise_free(&truth, 0.0, &crate::gnss_constellation());
    let lsq = IterativeLeastSquares::builder()
        .max_duration(Some(Duration::ZERO))
        .build();
    assert!(matches!(
        lsq.solve_epoch(&obs, &DVector::zeros(4)),
        Err(EstimationError::NoConvergence { iterations: 0, .. })
    ));
}

/// The batch solver recovers the clock bias drift of a static receiver.
#[rstest]
#[case(LsqSolver::NormalEquations)]
#[case(LsqSolver::LevenbergMarquardt)]
fn lsq_batch_drift(#[case] solver: LsqSolver) {
    let _ = pretty_env_logger::try_init();

    let truth = Vector3::new(6_371e3, 2_000.0, 1_000.0);
    let (b0, drift) = (120.0, 0.75);
    let t_ref = Epoch::from_tai_seconds(1_000.0);
    let epochs = crate::every_second(t_ref, 9);

    let mut obs = Vec::new();
    for epoch in &epochs {
        let bias = b0 + drift * (*epoch - t_ref).to_seconds();
        for o in noise_free(&truth, bias, &crate::gnss_constellation()) {
            obs.push(TimedRangeObservation { epoch: *epoch, obs: o });
        }
    }

    let lsq = IterativeLeastSquares::builder().solver(solver).build();
    let sol = lsq
        .solve_batch(t_ref, &obs, &DVector::from_vec(vec![6_000e3, 0.0, 0.0, 0.0, 0.0]))
        .unwrap();
    println!("{sol}");

    assert_abs_diff_eq!(sol.position(), truth, epsilon = 1e-5);
    assert_abs_diff_eq!(sol.bias_drift(), drift, epsilon = 1e-6);
    assert_abs_diff_eq!(sol.clock_bias(t_ref), b0, epsilon = 1e-5);
    assert_eq!(sol.num_obs, 60);

    let traj = sol.trajectory(&epochs).unwrap();
    assert_eq!(traj.len(), 10);
    assert_abs_diff_eq!(traj.states()[9][3], b0 + 9.0 * drift, epsilon = 1e-5);

    // A single epoch cannot separate the bias from its drift
    let first_epoch: Vec<TimedRangeObservation> =
        obs.iter().filter(|o| o.epoch == t_ref).copied().collect();
    assert!(matches!(
        lsq.solve_batch(t_ref, &first_epoch, &DVector::zeros(5)),
        Err(EstimationError::RankDeficient { .. })
    ));
}

/// Each epoch is solved from the previous solution; epochs with too few observations are skipped.
#[test]
fn lsq_epoch_by_epoch() {
    let _ = pretty_env_logger::try_init();

    let start = Epoch::from_tai_seconds(0.0);
    let epochs = crate::every_second(start, 4);
    let refs = crate::gnss_constellation();
    let mut data = Vec::new();
    for (i, epoch) in epochs.iter().enumerate() {
        let truth = Vector3::new(6_371e3 + 10.0 * i as f64, 0.0, 0.0);
        let visible = if i == 2 { &refs[..3] } else { &refs[..] };
        data.push((*epoch, noise_free(&truth, 50.0, visible)));
    }

    let traj = IterativeLeastSquares::default()
        .solve_epochs(&data, &DVector::zeros(4))
        .unwrap();
    println!("{traj}");
    assert_eq!(traj.len(), 4);
    assert!(traj.at(epochs[2]).is_none());
    let last = traj.at(epochs[4]).unwrap();
    assert_abs_diff_eq!(last[0], 6_371e3 + 40.0, epsilon = 1e-5);
    assert_abs_diff_eq!(last[3], 50.0, epsilon = 1e-5);
}

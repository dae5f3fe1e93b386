extern crate pretty_env_logger;
extern crate rayon;

use rayon::prelude::*;
use trajest::linalg::{DMatrix, DVector, Vector3};
use trajest::md::prelude::*;
use trajest::od::prelude::*;
use trajest::sim::{simulate, MeasurementSimulator};
use trajest::utils::rss_errors;

const SIGMA: f64 = 1.0;

struct Scenario {
    epochs: Vec<Epoch>,
    controls: Vec<DVector<f64>>,
    truth: Trajectory,
    measurements: Vec<DVector<f64>>,
}

/// A receiver moving with a known velocity over 30 seconds, measuring the pseudoranges of the constellation
/// every second.
fn scenario(seed: u128) -> Scenario {
    let start = Epoch::from_tai_seconds(0.0);
    let epochs = crate::every_second(start, 30);
    let controls = vec![DVector::from_vec(vec![0.0, 10.0, 5.0]); epochs.len()];
    let truth = simulate(
        &GnssPosAndBias,
        &crate::receiver_start(),
        &epochs,
        &controls,
        &(),
    )
    .unwrap();

    let mut sim =
        MeasurementSimulator::new(MultiPseudorange::new(6), &[SIGMA; 6], seed).unwrap();
    let measurements = sim.measure_trajectory(&truth, &[crate::all_visible()]).unwrap();

    Scenario {
        epochs,
        controls,
        truth,
        measurements,
    }
}

fn ranges(msr: &DVector<f64>) -> Vec<RangeObservation> {
    crate::gnss_constellation()
        .into_iter()
        .zip(msr.iter())
        .map(|(sat, range)| RangeObservation::new(sat, *range, SIGMA))
        .collect()
}

/// Position errors only, the clock bias drift is not estimated by all of the estimators.
fn position_rms(estimated: &Trajectory, truth: &Trajectory) -> f64 {
    let est: Vec<DVector<f64>> = estimated
        .states()
        .iter()
        .map(|s| s.rows(0, 3).into_owned())
        .collect();
    let tru: Vec<DVector<f64>> = estimated
        .epochs()
        .iter()
        .map(|e| truth.nearest(*e).unwrap().rows(0, 3).into_owned())
        .collect();
    rss_errors(&est, &tru)
}

fn run_ekf(scn: &Scenario, initial: &LsqSolution) -> Trajectory {
    let mut mean = DVector::zeros(5);
    mean.rows_mut(0, 4).copy_from(&initial.estimate);
    let mut covar = DMatrix::from_diagonal_element(5, 5, 10.0);
    covar.view_mut((0, 0), (4, 4)).copy_from(&initial.covariance);

    let mut ekf = ExtendedKalmanFilter::new(
        GnssPosAndBias,
        MultiPseudorange::new(6),
        scn.epochs[0],
        mean,
        covar,
    )
    .unwrap();

    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![1e-2, 1e-2, 1e-2, 1e-2, 1e-4]));
    let r = DMatrix::from_diagonal_element(6, 6, SIGMA.powi(2));
    let params = crate::all_visible();
    for i in 1..scn.epochs.len() {
        ekf.update(
            scn.epochs[i],
            &scn.controls[i - 1],
            &scn.measurements[i],
            &q,
            &r,
            &(),
            &params,
        )
        .unwrap();
    }
    ekf.trajectory().unwrap()
}

/// The least squares, the EKF and the trajectory smoother all recover the truth from the same pseudoranges.
#[test]
fn gnss_end_to_end() {
    let _ = pretty_env_logger::try_init();

    let scn = scenario(7);

    // Epoch by epoch least squares
    let data: Vec<(Epoch, Vec<RangeObservation>)> = scn
        .epochs
        .iter()
        .zip(&scn.measurements)
        .map(|(epoch, msr)| (*epoch, ranges(msr)))
        .collect();
    let lsq = IterativeLeastSquares::default();
    let lsq_traj = lsq.solve_epochs(&data, &DVector::zeros(4)).unwrap();
    assert_eq!(lsq_traj.len(), scn.epochs.len());
    let lsq_rms = position_rms(&lsq_traj, &scn.truth);
    println!("LSQ position RMS: {lsq_rms:.3} m");
    assert!(lsq_rms < 15.0);

    // EKF, initialized from the first least squares solution
    let first = lsq.solve_epoch(&data[0].1, &DVector::zeros(4)).unwrap();
    let ekf_traj = run_ekf(&scn, &first);
    let ekf_rms = position_rms(&ekf_traj, &scn.truth);
    println!("EKF position RMS: {ekf_rms:.3} m");
    assert!(ekf_rms < 15.0);

    // Trajectory smoother, with one node per measurement epoch
    let start = scn.epochs[0];
    let end = *scn.epochs.last().unwrap();
    let mut nlp = FixedTimeEstimationNlp::new(30, start, end, 5, 3).unwrap();
    let x = nlp.add_variables("receiver", 31, 5).unwrap();
    let guess: Vec<DVector<f64>> = lsq_traj
        .states()
        .iter()
        .map(|s| DVector::from_vec(vec![s[0], s[1], s[2], s[3], 0.0]))
        .collect();
    nlp.set_initial_guess(&x, &guess).unwrap();
    let process_noise = DVector::from_vec(vec![1e-2, 1e-2, 1e-2, 1e-2, 1e-4]);
    nlp.add_dynamics(
        GnssPosAndBias,
        &x,
        &scn.epochs,
        &scn.controls,
        &DMatrix::from_diagonal(&process_noise.map(|q| 1.0 / q)),
        (),
    )
    .unwrap();
    nlp.add_residual_cost(
        MultiPseudorange::new(6),
        &x,
        &scn.epochs,
        &scn.measurements,
        &DMatrix::from_diagonal_element(6, 6, 1.0 / SIGMA.powi(2)),
        &[crate::all_visible()],
    )
    .unwrap();
    nlp.build().unwrap();
    let report = nlp.solve().unwrap();
    println!("{report}");

    let nlp_traj = nlp.extract_solution("receiver", &scn.epochs).unwrap();
    let nlp_rms = position_rms(&nlp_traj, &scn.truth);
    println!("NLP position RMS: {nlp_rms:.3} m");
    assert!(nlp_rms < 15.0);

    // The smoother uses all of the data at once
    let drift = nlp_traj.component(4).unwrap();
    assert!((drift.mean() - 2.0).abs() < 0.5);
}

/// The batch least squares on a static receiver recovers the clock drift.
#[test]
fn gnss_static_batch() {
    let _ = pretty_env_logger::try_init();

    let start = Epoch::from_tai_seconds(0.0);
    let epochs = crate::every_second(start, 30);
    let controls = vec![DVector::zeros(3); epochs.len()];
    let truth = simulate(
        &GnssPosAndBias,
        &crate::receiver_start(),
        &epochs,
        &controls,
        &(),
    )
    .unwrap();
    let mut sim = MeasurementSimulator::new(MultiPseudorange::new(6), &[SIGMA; 6], 11).unwrap();
    let measurements = sim.measure_trajectory(&truth, &[crate::all_visible()]).unwrap();

    let obs: Vec<TimedRangeObservation> = epochs
        .iter()
        .zip(&measurements)
        .flat_map(|(epoch, msr)| {
            ranges(msr)
                .into_iter()
                .map(move |obs| TimedRangeObservation { epoch: *epoch, obs })
        })
        .collect();

    let sol = IterativeLeastSquares::default()
        .solve_batch(start, &obs, &DVector::zeros(5))
        .unwrap();
    println!("{sol}");
    assert!((sol.position() - Vector3::new(6_371e3, 0.0, 0.0)).norm() < 10.0);
    assert!((sol.bias_drift() - 2.0).abs() < 0.1);
}

/// Independent filters run in parallel on independent data.
#[test]
fn gnss_parallel_filters() {
    let _ = pretty_env_logger::try_init();

    let results: Vec<f64> = (0..8_u128)
        .into_par_iter()
        .map(|seed| {
            let scn = scenario(seed);
            let first = IterativeLeastSquares::default()
                .solve_epoch(&ranges(&scn.measurements[0]), &DVector::zeros(4))
                .unwrap();
            position_rms(&run_ekf(&scn, &first), &scn.truth)
        })
        .collect();

    for rms in results {
        assert!(rms < 15.0, "{rms}");
    }
}

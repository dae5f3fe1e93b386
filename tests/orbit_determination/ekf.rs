extern crate pretty_env_logger;

use approx::assert_abs_diff_eq;
use nalgebra::SymmetricEigen;
use rstest::*;
use trajest::linalg::{DMatrix, DVector};
use trajest::od::prelude::*;

fn sorted_eigenvalues(m: &DMatrix<f64>) -> Vec<f64> {
    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(m.clone())
        .eigenvalues
        .iter()
        .copied()
        .collect();
    eigenvalues.sort_by(|a, b| a.partial_cmp(b).unwrap());
    eigenvalues
}

#[fixture]
fn filter() -> ExtendedKalmanFilter<SingleIntegrator, FullState> {
    ExtendedKalmanFilter::new(
        SingleIntegrator::new(2),
        FullState::new(2),
        Epoch::from_tai_seconds(0.0),
        DVector::from_vec(vec![5.0, -5.0]),
        DMatrix::from_diagonal_element(2, 2, 10.0),
    )
    .unwrap()
}

/// With a full state measurement and a tiny measurement noise, the posterior mean is the measurement and every
/// eigenvalue of the covariance shrinks with each update.
#[rstest]
#[case(1e-8)]
#[case(1e-4)]
fn ekf_full_state_convergence(
    #[case] msr_variance: f64,
    mut filter: ExtendedKalmanFilter<SingleIntegrator, FullState>,
) {
    let _ = pretty_env_logger::try_init();

    let truth = DVector::from_vec(vec![1.0, 2.0]);
    let q = DMatrix::from_diagonal_element(2, 2, 1e-3);
    let r = DMatrix::from_diagonal_element(2, 2, msr_variance);
    let control = DVector::zeros(2);

    let t0 = filter.previous_estimate().epoch;
    for step in 1..=10 {
        let epoch = t0 + (step as f64).seconds();
        let (est, resid) = filter
            .update(epoch, &control, &truth, &q, &r, &(), &())
            .unwrap();

        assert!(!est.predicted);
        assert!(!resid.rejected);
        assert_eq!(resid.num_used(), 2);

        let prior = sorted_eigenvalues(&est.covar_bar);
        let posterior = sorted_eigenvalues(&est.covar);
        for (post, prior) in posterior.iter().zip(&prior) {
            assert!(post <= prior, "{post} > {prior}");
            assert!(*post >= 0.0);
        }
        assert!(est.within_3sigma(&(&est.state - &truth)) || step == 1);
    }

    let est = filter.previous_estimate();
    println!("{est}");
    assert_abs_diff_eq!(est.state, truth, epsilon = 1e-3);
    assert_eq!(filter.estimates().len(), 11);
    assert_eq!(filter.residuals().len(), 10);

    let traj = filter.trajectory().unwrap();
    assert_eq!(traj.len(), 11);
    assert_eq!(traj.first().unwrap().1, &DVector::from_vec(vec![5.0, -5.0]));
}

/// Without any available measurement channel, the update returns the prediction.
#[rstest]
fn ekf_no_measurement(mut filter: ExtendedKalmanFilter<SingleIntegrator, FullState>) {
    let _ = pretty_env_logger::try_init();

    let epoch = filter.previous_estimate().epoch + 2.seconds();
    let control = DVector::from_vec(vec![1.0, 0.5]);
    let q = DMatrix::from_diagonal_element(2, 2, 0.1);

    let mut predictor = filter.clone();
    let predicted = predictor.time_update(epoch, &control, &q, &()).unwrap();

    let (est, resid) = filter
        .update(
            epoch,
            &control,
            &DVector::from_element(2, f64::NAN),
            &q,
            &DMatrix::identity(2, 2),
            &(),
            &(),
        )
        .unwrap();

    assert_eq!(est.state, predicted.state);
    assert_eq!(est.covar, predicted.covar);
    assert_eq!(est.state, DVector::from_vec(vec![7.0, -4.0]));
    assert_eq!(resid.num_used(), 0);
    assert_eq!(resid.used, vec![false, false]);
}

/// A singular innovation covariance fails the update and leaves the filter unchanged.
#[test]
fn ekf_singular_innovation() {
    let _ = pretty_env_logger::try_init();

    let t0 = Epoch::from_tai_seconds(0.0);
    let mut filter = ExtendedKalmanFilter::new(
        SingleIntegrator::new(2),
        FullState::new(2),
        t0,
        DVector::zeros(2),
        DMatrix::zeros(2, 2),
    )
    .unwrap();

    let zeros = DMatrix::zeros(2, 2);
    assert_eq!(
        filter.update(
            t0 + 1.seconds(),
            &DVector::zeros(2),
            &DVector::from_vec(vec![1.0, 1.0]),
            &zeros,
            &zeros,
            &(),
            &()
        ),
        Err(EstimationError::SingularInnovationCovariance)
    );
    assert_eq!(filter.previous_estimate().epoch, t0);
    assert_eq!(filter.estimates().len(), 1);
    assert!(filter.residuals().is_empty());
}

/// Channels of unavailable satellites are excluded from the update.
#[test]
fn ekf_partial_channels() {
    let _ = pretty_env_logger::try_init();

    let t0 = Epoch::from_tai_seconds(0.0);
    let truth = crate::receiver_start();
    let mut params = crate::all_visible();
    params.sat_pos[1] = None;

    let model = MultiPseudorange::new(6);
    let real_obs = model.computed_obs(&truth, &params);
    assert!(real_obs[1].is_nan());

    let mut filter = ExtendedKalmanFilter::new(
        GnssPosAndBias,
        model,
        t0,
        &truth + DVector::from_vec(vec![3.0, -2.0, 1.0, 5.0, 0.0]),
        DMatrix::from_diagonal(&DVector::from_vec(vec![100.0, 100.0, 100.0, 100.0, 1.0])),
    )
    .unwrap();

    let (_, resid) = filter
        .measurement_update(&real_obs, &DMatrix::identity(6, 6), &params)
        .unwrap();
    println!("{resid}");
    assert_eq!(resid.used, vec![true, false, true, true, true, true]);
    assert_eq!(resid.num_used(), 5);
    assert!(resid.prefit(1).is_none());
    assert!(resid.prefit(0).is_some());
    // The postfit residuals are smaller than the prefit ones
    assert!(resid.postfit.norm() < resid.prefit.norm());
}

/// Outliers are rejected when a rejection criteria is set.
#[rstest]
fn ekf_outlier_rejection(filter: ExtendedKalmanFilter<SingleIntegrator, FullState>) {
    let _ = pretty_env_logger::try_init();

    let mut filter = filter.with_resid_crit(ResidRejectCrit::default());
    let epoch = filter.previous_estimate().epoch + 1.seconds();
    let control = DVector::zeros(2);
    let q = DMatrix::from_diagonal_element(2, 2, 0.1);
    let r = DMatrix::from_diagonal_element(2, 2, 0.01);

    let (est, resid) = filter
        .update(
            epoch,
            &control,
            &DVector::from_vec(vec![500.0, -5.0]),
            &q,
            &r,
            &(),
            &(),
        )
        .unwrap();
    assert!(resid.rejected);
    assert!(resid.ratio > 3.0);
    assert_eq!(est.state, DVector::from_vec(vec![5.0, -5.0]));

    // A consistent measurement is accepted
    let (est, resid) = filter
        .update(
            epoch + 1.seconds(),
            &control,
            &DVector::from_vec(vec![6.0, -4.0]),
            &q,
            &r,
            &(),
            &(),
        )
        .unwrap();
    assert!(!resid.rejected);
    assert!(est.state[0] > 5.0);
}

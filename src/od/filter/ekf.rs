/*
    Trajest, trajectory estimation toolkit
    Copyright (C) 2018-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use super::ResidRejectCrit;
use crate::errors::{
    DimensionMismatchSnafu, EstimationError, InvalidWeightSnafu, NonMonotonicTimeSnafu,
    SingularInnovationCovarianceSnafu,
};
use crate::linalg::{DMatrix, DVector};
use crate::md::trajectory::Trajectory;
use crate::models::{DynamicsModel, MeasurementModel};
use crate::od::estimate::{KfEstimate, Residual};
use crate::time::Epoch;
use crate::utils::{clip_psd, is_symmetric, mask_rows, mask_square, mask_vector, symmetrize};
use snafu::ensure;

/// Defines both a Kalman filter and an extended Kalman filter on the states of a dynamics model and the
/// observations of a measurement model.
///
/// The filter is always extended: the dynamics and the measurement models are relinearized about the latest
/// estimate at each step. Each step is atomic: if it fails, the filter keeps its previous estimate.
#[derive(Debug, Clone)]
pub struct ExtendedKalmanFilter<D, M>
where
    D: DynamicsModel,
    M: MeasurementModel,
{
    dynamics: D,
    measurement: M,
    /// The previous estimate used in the filter computations.
    prev_estimate: KfEstimate,
    /// Optional rejection of measurements with a large residual ratio
    pub resid_crit: Option<ResidRejectCrit>,
    estimates: Vec<KfEstimate>,
    residuals: Vec<Residual>,
}

impl<D, M> ExtendedKalmanFilter<D, M>
where
    D: DynamicsModel,
    M: MeasurementModel,
{
    /// Initializes a new filter from the models and the initial mean and covariance.
    pub fn new(
        dynamics: D,
        measurement: M,
        epoch: Epoch,
        mean: DVector<f64>,
        covar: DMatrix<f64>,
    ) -> Result<Self, EstimationError> {
        let n = dynamics.state_dim();
        ensure!(
            measurement.state_dim() == n,
            DimensionMismatchSnafu {
                action: "measurement model state",
                expected: n,
                got: measurement.state_dim()
            }
        );
        ensure!(
            mean.len() == n,
            DimensionMismatchSnafu {
                action: "initial mean",
                expected: n,
                got: mean.len()
            }
        );
        ensure!(
            covar.shape() == (n, n),
            DimensionMismatchSnafu {
                action: "initial covariance",
                expected: n * n,
                got: covar.len()
            }
        );
        ensure!(
            is_symmetric(&covar),
            InvalidWeightSnafu {
                what: "initial covariance"
            }
        );

        let initial = KfEstimate::from_covar(epoch, mean, symmetrize(&covar));
        debug!("initial estimate\n{initial}");

        Ok(Self {
            dynamics,
            measurement,
            estimates: vec![initial.clone()],
            prev_estimate: initial,
            resid_crit: None,
            residuals: Vec::new(),
        })
    }

    /// Rejects measurements whose residual ratio exceeds the criteria.
    pub fn with_resid_crit(mut self, crit: ResidRejectCrit) -> Self {
        self.resid_crit = Some(crit);
        self
    }

    /// Returns the previous estimate
    pub fn previous_estimate(&self) -> &KfEstimate {
        &self.prev_estimate
    }

    /// Returns all of the estimates of this filter, the initial one included, one per epoch.
    pub fn estimates(&self) -> &[KfEstimate] {
        &self.estimates
    }

    /// Returns the residual of each measurement update.
    pub fn residuals(&self) -> &[Residual] {
        &self.residuals
    }

    /// Returns the trajectory of the estimated means.
    pub fn trajectory(&self) -> Result<Trajectory, EstimationError> {
        Ok(Trajectory::new(
            self.estimates.iter().map(|est| est.epoch).collect(),
            self.estimates.iter().map(|est| est.state.clone()).collect(),
        )?
        .with_name("EKF"))
    }

    /// Stores the new estimate, replacing the last recorded one if it is at the same epoch.
    fn set_estimate(&mut self, estimate: KfEstimate) {
        match self.estimates.last_mut() {
            Some(last) if last.epoch == estimate.epoch => *last = estimate.clone(),
            _ => self.estimates.push(estimate.clone()),
        }
        self.prev_estimate = estimate;
    }

    /// Computes the prediction at the provided epoch, without changing the filter.
    fn predict(
        &self,
        epoch: Epoch,
        control: &DVector<f64>,
        process_noise: &DMatrix<f64>,
        params: &D::Params,
    ) -> Result<KfEstimate, EstimationError> {
        let prev = &self.prev_estimate;
        ensure!(
            epoch >= prev.epoch,
            NonMonotonicTimeSnafu {
                prev: prev.epoch,
                next: epoch
            }
        );
        let n = prev.dim();
        ensure!(
            process_noise.shape() == (n, n),
            DimensionMismatchSnafu {
                action: "process noise",
                expected: n * n,
                got: process_noise.len()
            }
        );
        ensure!(
            is_symmetric(process_noise),
            InvalidWeightSnafu {
                what: "process noise"
            }
        );
        self.dynamics.validate(params)?;

        let dt = (epoch - prev.epoch).to_seconds();
        let transition = self.dynamics.propagate(&prev.state, control, dt, params)?;
        let stm = transition.state_jacobian;

        let covar_bar = symmetrize(&(&stm * &prev.covar * stm.transpose() + process_noise));

        Ok(KfEstimate {
            epoch,
            state: transition.next_state,
            covar: covar_bar.clone(),
            covar_bar,
            predicted: true,
            stm,
        })
    }

    /// Computes the measurement update of the predicted estimate, without changing the filter.
    fn correct(
        &self,
        predicted: &KfEstimate,
        real_obs: &DVector<f64>,
        msr_noise: &DMatrix<f64>,
        params: &M::Params,
    ) -> Result<(KfEstimate, Residual), EstimationError> {
        let p = self.measurement.msr_dim();
        let epoch = predicted.epoch;
        ensure!(
            real_obs.len() == p,
            DimensionMismatchSnafu {
                action: "measurement",
                expected: p,
                got: real_obs.len()
            }
        );
        ensure!(
            msr_noise.shape() == (p, p),
            DimensionMismatchSnafu {
                action: "measurement noise",
                expected: p * p,
                got: msr_noise.len()
            }
        );
        ensure!(
            is_symmetric(msr_noise),
            InvalidWeightSnafu {
                what: "measurement noise"
            }
        );
        self.measurement.validate(params)?;

        let lin = self.measurement.linearize(&predicted.state, params)?;

        // Unavailable channels are excluded from the update.
        let used: Vec<bool> = real_obs
            .iter()
            .zip(lin.computed_obs.iter())
            .map(|(real, computed)| real.is_finite() && computed.is_finite())
            .collect();

        if !used.iter().any(|u| *u) {
            debug!("no measurement available @ {epoch}, keeping the prediction");
            return Ok((predicted.clone(), Residual::no_data(epoch, p)));
        }

        let real_obs = mask_vector(real_obs, &used);
        let computed_obs = mask_vector(&lin.computed_obs, &used);
        let h_tilde = mask_rows(&lin.sensitivity, &used);
        let r_k = mask_square(msr_noise, &used);

        let covar_bar = &predicted.covar;
        let h_tilde_t = h_tilde.transpose();
        let innovation_covar = symmetrize(&(&h_tilde * covar_bar * &h_tilde_t + &r_k));

        // Compute observation deviation (usually marked as y_i)
        let prefit = &real_obs - &computed_obs;

        let s_inv = invert_innovation(&innovation_covar)?;

        // Mahalanobis distance of the prefit with respect to the innovation covariance
        let ratio = (prefit.transpose() * &s_inv * &prefit)[(0, 0)].max(0.0).sqrt();

        if let Some(crit) = self.resid_crit {
            if ratio > crit.num_sigmas {
                warn!(
                    "rejecting measurement @ {epoch}: residual ratio {ratio:.3} > {}",
                    crit.num_sigmas
                );
                return Ok((
                    predicted.clone(),
                    Residual::rejected(
                        epoch,
                        prefit,
                        ratio,
                        r_k.diagonal(),
                        used,
                        real_obs,
                        computed_obs,
                    ),
                ));
            }
        }

        let gain = covar_bar * &h_tilde_t * s_inv;

        let state_hat = &gain * &prefit;
        let postfit = &prefit - &h_tilde * &state_hat;

        // Compute covariance (Joseph update), floored to PSD against round off on tight measurements
        let n = predicted.dim();
        let first_term = DMatrix::<f64>::identity(n, n) - &gain * &h_tilde;
        let covar = clip_psd(
            &(&first_term * covar_bar * first_term.transpose() + &gain * &r_k * gain.transpose()),
        );

        let estimate = KfEstimate {
            epoch,
            state: &predicted.state + state_hat,
            covar,
            covar_bar: predicted.covar_bar.clone(),
            predicted: false,
            stm: predicted.stm.clone(),
        };

        Ok((
            estimate,
            Residual::accepted(
                epoch,
                prefit,
                postfit,
                ratio,
                r_k.diagonal(),
                used,
                real_obs,
                computed_obs,
            ),
        ))
    }

    /// Computes a time update (prediction) to the provided epoch with the provided control and process noise.
    pub fn time_update(
        &mut self,
        epoch: Epoch,
        control: &DVector<f64>,
        process_noise: &DMatrix<f64>,
        params: &D::Params,
    ) -> Result<KfEstimate, EstimationError> {
        let estimate = self.predict(epoch, control, process_noise, params)?;
        trace!("{estimate}");
        self.set_estimate(estimate.clone());
        Ok(estimate)
    }

    /// Computes the measurement update of the current estimate with the provided real observation.
    ///
    /// Non finite entries of the observation, and channels whose computed observation is not finite, are excluded.
    /// If no channel remains, the estimate is unchanged.
    pub fn measurement_update(
        &mut self,
        real_obs: &DVector<f64>,
        msr_noise: &DMatrix<f64>,
        params: &M::Params,
    ) -> Result<(KfEstimate, Residual), EstimationError> {
        let (estimate, residual) =
            self.correct(&self.prev_estimate, real_obs, msr_noise, params)?;
        trace!("{residual}");
        self.set_estimate(estimate.clone());
        self.residuals.push(residual.clone());
        Ok((estimate, residual))
    }

    /// Runs one full cycle of the filter: the prediction to the new epoch followed by the measurement update.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        epoch: Epoch,
        control: &DVector<f64>,
        real_obs: &DVector<f64>,
        process_noise: &DMatrix<f64>,
        msr_noise: &DMatrix<f64>,
        dyn_params: &D::Params,
        msr_params: &M::Params,
    ) -> Result<(KfEstimate, Residual), EstimationError> {
        let predicted = self.predict(epoch, control, process_noise, dyn_params)?;
        let (estimate, residual) = self.correct(&predicted, real_obs, msr_noise, msr_params)?;
        debug!("{residual}");
        self.set_estimate(estimate.clone());
        self.residuals.push(residual.clone());
        Ok((estimate, residual))
    }
}

/// Inverts the innovation covariance through its Cholesky factorization, falling back to an LU decomposition.
fn invert_innovation(innovation_covar: &DMatrix<f64>) -> Result<DMatrix<f64>, EstimationError> {
    ensure!(
        innovation_covar.iter().all(|v| v.is_finite()),
        SingularInnovationCovarianceSnafu
    );
    if let Some(chol) = innovation_covar.clone().cholesky() {
        return Ok(chol.inverse());
    }
    warn!("innovation covariance is not positive definite, inverting with LU");
    match innovation_covar.clone().try_inverse() {
        Some(inv) if inv.iter().all(|v| v.is_finite()) => Ok(inv),
        _ => SingularInnovationCovarianceSnafu.fail(),
    }
}

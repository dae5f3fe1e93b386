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

use crate::errors::{DimensionMismatchSnafu, EstimationError, InvalidWeightSnafu};
use crate::linalg::{DMatrix, DVector};
use crate::md::trajectory::Trajectory;
use crate::models::{DynamicsModel, MeasurementModel};
use crate::time::Epoch;
use crate::utils::ensure_monotonic;
use rand::Rng;
use rand_distr::StandardNormal;
use rand_pcg::Pcg64Mcg;
use serde_derive::{Deserialize, Serialize};
use snafu::ensure;
use std::ops::{Mul, MulAssign};

/// White noise is an uncorrelated random variable.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WhiteNoise {
    /// Mean value of this white noise
    pub mean: f64,
    /// One-sigma of the Normal distribution.
    pub sigma: f64,
}

impl WhiteNoise {
    pub fn new(sigma: f64) -> Result<Self, EstimationError> {
        ensure!(
            sigma.is_finite() && sigma >= 0.0,
            InvalidWeightSnafu {
                what: "white noise sigma"
            }
        );
        Ok(Self { mean: 0.0, sigma })
    }

    pub fn variance(&self) -> f64 {
        self.sigma.powi(2)
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.sigma * z
    }
}

impl Mul<f64> for WhiteNoise {
    type Output = Self;

    /// Scale the white noise sigmas by a constant.
    fn mul(mut self, rhs: f64) -> Self::Output {
        self.sigma *= rhs;
        self
    }
}

impl MulAssign<f64> for WhiteNoise {
    fn mul_assign(&mut self, rhs: f64) {
        *self = *self * rhs;
    }
}

/// Propagates the initial state through the epochs with the dynamics model, without any noise.
///
/// The control applied between epochs `i` and `i + 1` is the control `i`: there must be either as many controls as
/// epochs (the last one is unused) or one fewer.
pub fn simulate<D: DynamicsModel>(
    model: &D,
    initial_state: &DVector<f64>,
    epochs: &[Epoch],
    controls: &[DVector<f64>],
    params: &D::Params,
) -> Result<Trajectory, EstimationError> {
    ensure_monotonic(epochs)?;
    let steps = epochs.len().saturating_sub(1);
    ensure!(
        controls.len() == epochs.len() || controls.len() == steps,
        DimensionMismatchSnafu {
            action: "simulation controls",
            expected: epochs.len(),
            got: controls.len()
        }
    );
    model.validate(params)?;

    let mut states = Vec::with_capacity(epochs.len());
    if !epochs.is_empty() {
        let mut state = initial_state.clone();
        for (pair, control) in epochs.windows(2).zip(controls) {
            let dt = (pair[1] - pair[0]).to_seconds();
            let next = model.propagate(&state, control, dt, params)?.next_state;
            states.push(state);
            state = next;
        }
        states.push(state);
    }

    Ok(Trajectory::new(epochs.to_vec(), states)?.with_name("truth"))
}

/// Generates noisy measurements of states, with an independent white noise on each channel.
pub struct MeasurementSimulator<M: MeasurementModel> {
    model: M,
    noises: Vec<WhiteNoise>,
    rng: Pcg64Mcg,
}

impl<M: MeasurementModel> MeasurementSimulator<M> {
    /// Initializes a new simulator from the one sigma noise of each channel, and the seed of its random generator.
    pub fn new(model: M, sigmas: &[f64], seed: u128) -> Result<Self, EstimationError> {
        ensure!(
            sigmas.len() == model.msr_dim(),
            DimensionMismatchSnafu {
                action: "measurement noise sigmas",
                expected: model.msr_dim(),
                got: sigmas.len()
            }
        );
        let noises = sigmas
            .iter()
            .map(|sigma| WhiteNoise::new(*sigma))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            model,
            noises,
            rng: Pcg64Mcg::new(seed),
        })
    }

    /// Diagonal covariance of the measurement noise
    pub fn noise_covariance(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_iterator(
            self.noises.len(),
            self.noises.iter().map(|wn| wn.variance()),
        ))
    }

    /// Measures the provided state. Channels which the model cannot compute stay non finite.
    pub fn measure(
        &mut self,
        state: &DVector<f64>,
        params: &M::Params,
    ) -> Result<DVector<f64>, EstimationError> {
        let mut obs = self.model.linearize(state, params)?.computed_obs;
        for (value, noise) in obs.iter_mut().zip(&self.noises) {
            if value.is_finite() {
                *value += noise.sample(&mut self.rng);
            }
        }
        Ok(obs)
    }

    /// Measures every state of the trajectory. The parameters are either shared (one entry) or given per state.
    pub fn measure_trajectory(
        &mut self,
        traj: &Trajectory,
        params: &[M::Params],
    ) -> Result<Vec<DVector<f64>>, EstimationError> {
        ensure!(
            params.len() == 1 || params.len() == traj.len(),
            DimensionMismatchSnafu {
                action: "measurement parameters",
                expected: traj.len(),
                got: params.len()
            }
        );
        traj.states()
            .iter()
            .enumerate()
            .map(|(i, state)| {
                let p = if params.len() == 1 { &params[0] } else { &params[i] };
                self.measure(state, p)
            })
            .collect()
    }
}

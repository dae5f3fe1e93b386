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

use crate::errors::{DimensionMismatchSnafu, EstimationError};
use crate::linalg::{DMatrix, DVector};
use snafu::ensure;

mod dynamics;
pub use dynamics::{GnssPosAndBias, SingleIntegrator};

mod measurement;
pub use measurement::{
    FullState, MultiPseudorange, MultiPseudorangeParams, Pseudorange, PseudorangeParams,
};

/// The result of evaluating a dynamics model: the next state and its partials.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// State at the end of the time step
    pub next_state: DVector<f64>,
    /// Partials of the next state with respect to the current state (often noted F or Φ)
    pub state_jacobian: DMatrix<f64>,
    /// Partials of the next state with respect to the control, if the model provides them
    pub control_jacobian: Option<DMatrix<f64>>,
}

/// The result of evaluating a measurement model: the computed observation and its sensitivity.
#[derive(Clone, Debug, PartialEq)]
pub struct Linearization {
    /// The computed observation, as expected from the state
    pub computed_obs: DVector<f64>,
    /// The measurement sensitivity, i.e. the partials of the computed observation with respect to the state (often noted H tilde)
    pub sensitivity: DMatrix<f64>,
}

/// A discrete time dynamics model `x_{k+1} = f(x_k, u_k, Δt)`.
///
/// Implementations must be deterministic and side effect free: the same inputs always produce the same outputs.
/// The state and control dimensions are fixed when the model is constructed.
pub trait DynamicsModel {
    /// Model specific configuration needed at evaluation time (e.g. a reference position).
    type Params: Clone;

    /// Dimension of the state vector
    fn state_dim(&self) -> usize;

    /// Dimension of the control vector
    fn control_dim(&self) -> usize;

    /// Computes the state after a time step of `dt` seconds.
    fn next_state(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dt: f64,
        params: &Self::Params,
    ) -> DVector<f64>;

    /// Computes the partials of the next state with respect to the current state.
    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dt: f64,
        params: &Self::Params,
    ) -> DMatrix<f64>;

    /// Computes the partials of the next state with respect to the control, if available.
    fn control_jacobian(
        &self,
        _state: &DVector<f64>,
        _control: &DVector<f64>,
        _dt: f64,
        _params: &Self::Params,
    ) -> Option<DMatrix<f64>> {
        None
    }

    /// Checks the parameters before they are used: called when the model is registered with an estimator, and
    /// before each evaluation.
    fn validate(&self, _params: &Self::Params) -> Result<(), EstimationError> {
        Ok(())
    }

    /// Evaluates the model and its partials after checking all of the dimensions and the parameters.
    fn propagate(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dt: f64,
        params: &Self::Params,
    ) -> Result<Transition, EstimationError> {
        let n = self.state_dim();
        ensure!(
            state.len() == n,
            DimensionMismatchSnafu {
                action: "dynamics state",
                expected: n,
                got: state.len()
            }
        );
        ensure!(
            control.len() == self.control_dim(),
            DimensionMismatchSnafu {
                action: "dynamics control",
                expected: self.control_dim(),
                got: control.len()
            }
        );
        self.validate(params)?;

        let next_state = self.next_state(state, control, dt, params);
        ensure!(
            next_state.len() == n,
            DimensionMismatchSnafu {
                action: "dynamics output",
                expected: n,
                got: next_state.len()
            }
        );

        let state_jacobian = self.state_jacobian(state, control, dt, params);
        ensure!(
            state_jacobian.shape() == (n, n),
            DimensionMismatchSnafu {
                action: "dynamics state jacobian",
                expected: n * n,
                got: state_jacobian.len()
            }
        );

        let control_jacobian = self.control_jacobian(state, control, dt, params);
        if let Some(ctrl_jac) = &control_jacobian {
            ensure!(
                ctrl_jac.shape() == (n, self.control_dim()),
                DimensionMismatchSnafu {
                    action: "dynamics control jacobian",
                    expected: n * self.control_dim(),
                    got: ctrl_jac.len()
                }
            );
        }

        Ok(Transition {
            next_state,
            state_jacobian,
            control_jacobian,
        })
    }
}

/// A measurement model `y = h(x)`.
///
/// Implementations must be deterministic and side effect free. The state and measurement dimensions are fixed when
/// the model is constructed. A measurement channel which cannot be computed for the provided parameters (e.g. an
/// unavailable satellite) must return a non finite computed observation: estimators exclude such rows.
pub trait MeasurementModel {
    /// Model specific configuration needed at evaluation time (e.g. satellite positions).
    type Params: Clone;

    /// Dimension of the state vector
    fn state_dim(&self) -> usize;

    /// Dimension of the measurement vector
    fn msr_dim(&self) -> usize;

    /// Computes the observation expected from the provided state.
    fn computed_obs(&self, state: &DVector<f64>, params: &Self::Params) -> DVector<f64>;

    /// Computes the measurement sensitivity matrix at the provided state.
    fn sensitivity(&self, state: &DVector<f64>, params: &Self::Params) -> DMatrix<f64>;

    /// Checks the parameters before they are used: called when the model is registered with an estimator, and
    /// before each evaluation.
    fn validate(&self, _params: &Self::Params) -> Result<(), EstimationError> {
        Ok(())
    }

    /// Evaluates the model and its sensitivity after checking all of the dimensions and the parameters.
    fn linearize(
        &self,
        state: &DVector<f64>,
        params: &Self::Params,
    ) -> Result<Linearization, EstimationError> {
        let n = self.state_dim();
        let p = self.msr_dim();
        ensure!(
            state.len() == n,
            DimensionMismatchSnafu {
                action: "measurement state",
                expected: n,
                got: state.len()
            }
        );
        self.validate(params)?;

        let computed_obs = self.computed_obs(state, params);
        ensure!(
            computed_obs.len() == p,
            DimensionMismatchSnafu {
                action: "computed observation",
                expected: p,
                got: computed_obs.len()
            }
        );

        let sensitivity = self.sensitivity(state, params);
        ensure!(
            sensitivity.shape() == (p, n),
            DimensionMismatchSnafu {
                action: "measurement sensitivity",
                expected: p * n,
                got: sensitivity.len()
            }
        );

        Ok(Linearization {
            computed_obs,
            sensitivity,
        })
    }
}

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

use super::DynamicsModel;
use crate::linalg::{DMatrix, DVector};

/// A single integrator of any dimension, where the control is the rate of the state: `x⁺ = x + u Δt`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SingleIntegrator {
    pub dim: usize,
}

impl SingleIntegrator {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl DynamicsModel for SingleIntegrator {
    type Params = ();

    fn state_dim(&self) -> usize {
        self.dim
    }

    fn control_dim(&self) -> usize {
        self.dim
    }

    fn next_state(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dt: f64,
        _: &(),
    ) -> DVector<f64> {
        state + control * dt
    }

    fn state_jacobian(&self, _: &DVector<f64>, _: &DVector<f64>, _: f64, _: &()) -> DMatrix<f64> {
        DMatrix::identity(self.dim, self.dim)
    }

    fn control_jacobian(
        &self,
        _: &DVector<f64>,
        _: &DVector<f64>,
        dt: f64,
        _: &(),
    ) -> Option<DMatrix<f64>> {
        Some(DMatrix::identity(self.dim, self.dim) * dt)
    }
}

/// Receiver position with a clock bias and a clock bias drift, in meters and meters per second.
///
/// The state is `[x, y, z, b, ḃ]` and the control is the receiver velocity in m/s, so that
/// `p⁺ = p + u Δt`, `b⁺ = b + ḃ Δt` and `ḃ⁺ = ḃ`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GnssPosAndBias;

impl GnssPosAndBias {
    pub const STATE_DIM: usize = 5;
    pub const CONTROL_DIM: usize = 3;
}

impl DynamicsModel for GnssPosAndBias {
    type Params = ();

    fn state_dim(&self) -> usize {
        Self::STATE_DIM
    }

    fn control_dim(&self) -> usize {
        Self::CONTROL_DIM
    }

    fn next_state(
        &self,
        state: &DVector<f64>,
        control: &DVector<f64>,
        dt: f64,
        _: &(),
    ) -> DVector<f64> {
        let mut next = state.clone();
        for i in 0..3 {
            next[i] += control[i] * dt;
        }
        next[3] += state[4] * dt;
        next
    }

    fn state_jacobian(&self, _: &DVector<f64>, _: &DVector<f64>, dt: f64, _: &()) -> DMatrix<f64> {
        let mut phi = DMatrix::identity(Self::STATE_DIM, Self::STATE_DIM);
        phi[(3, 4)] = dt;
        phi
    }

    fn control_jacobian(
        &self,
        _: &DVector<f64>,
        _: &DVector<f64>,
        dt: f64,
        _: &(),
    ) -> Option<DMatrix<f64>> {
        let mut gamma = DMatrix::zeros(Self::STATE_DIM, Self::CONTROL_DIM);
        for i in 0..3 {
            gamma[(i, i)] = dt;
        }
        Some(gamma)
    }
}

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

use super::MeasurementModel;
use crate::errors::{DimensionMismatchSnafu, EstimationError, InvalidParametersSnafu};
use crate::linalg::{DMatrix, DVector, Vector3};
use snafu::ensure;

/// Direct observation of the full state, `h(x) = x`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FullState {
    pub dim: usize,
}

impl FullState {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl MeasurementModel for FullState {
    type Params = ();

    fn state_dim(&self) -> usize {
        self.dim
    }

    fn msr_dim(&self) -> usize {
        self.dim
    }

    fn computed_obs(&self, state: &DVector<f64>, _: &()) -> DVector<f64> {
        state.clone()
    }

    fn sensitivity(&self, _: &DVector<f64>, _: &()) -> DMatrix<f64> {
        DMatrix::identity(self.dim, self.dim)
    }
}

/// Position of the transmitting satellite for a single pseudorange, in the same frame as the receiver state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PseudorangeParams {
    pub sat_pos: Vector3<f64>,
}

/// Range between the receiver and one satellite, plus the receiver clock bias (in meters).
///
/// Operates on the [super::GnssPosAndBias] state `[x, y, z, b, ḃ]`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pseudorange;

/// Computes the pseudorange and its sensitivity row for a receiver state and a satellite position.
fn pseudorange_row(state: &DVector<f64>, sat_pos: &Vector3<f64>) -> (f64, [f64; 5]) {
    let rx = Vector3::new(state[0], state[1], state[2]);
    let los = rx - sat_pos;
    let range = los.norm();
    let unit = if range > 0.0 { los / range } else { Vector3::zeros() };
    (range + state[3], [unit.x, unit.y, unit.z, 1.0, 0.0])
}

impl MeasurementModel for Pseudorange {
    type Params = PseudorangeParams;

    fn state_dim(&self) -> usize {
        5
    }

    fn msr_dim(&self) -> usize {
        1
    }

    fn computed_obs(&self, state: &DVector<f64>, params: &PseudorangeParams) -> DVector<f64> {
        DVector::from_element(1, pseudorange_row(state, &params.sat_pos).0)
    }

    fn sensitivity(&self, state: &DVector<f64>, params: &PseudorangeParams) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 5, &pseudorange_row(state, &params.sat_pos).1)
    }

    fn validate(&self, params: &PseudorangeParams) -> Result<(), EstimationError> {
        ensure!(
            params.sat_pos.iter().all(|x| x.is_finite()),
            InvalidParametersSnafu {
                details: format!("satellite position {} is not finite", params.sat_pos.transpose())
            }
        );
        Ok(())
    }
}

/// Satellite positions for each channel of a [MultiPseudorange] model, `None` if that channel is not tracked.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiPseudorangeParams {
    pub sat_pos: Vec<Option<Vector3<f64>>>,
}

/// Pseudoranges to a fixed number of receiver channels.
///
/// The measurement dimension is the number of channels. Channels without a satellite produce a NaN computed
/// observation and a zero sensitivity row, so the estimators drop them before any matrix assembly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MultiPseudorange {
    pub channels: usize,
}

impl MultiPseudorange {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl MeasurementModel for MultiPseudorange {
    type Params = MultiPseudorangeParams;

    fn state_dim(&self) -> usize {
        5
    }

    fn msr_dim(&self) -> usize {
        self.channels
    }

    fn computed_obs(&self, state: &DVector<f64>, params: &MultiPseudorangeParams) -> DVector<f64> {
        DVector::from_iterator(
            self.channels,
            params.sat_pos.iter().map(|sat| match sat {
                Some(sat_pos) => pseudorange_row(state, sat_pos).0,
                None => f64::NAN,
            }),
        )
    }

    fn sensitivity(&self, state: &DVector<f64>, params: &MultiPseudorangeParams) -> DMatrix<f64> {
        let mut h_tilde = DMatrix::zeros(self.channels, 5);
        for (i, sat) in params.sat_pos.iter().enumerate() {
            if let Some(sat_pos) = sat {
                let (_, row) = pseudorange_row(state, sat_pos);
                for (j, val) in row.iter().enumerate() {
                    h_tilde[(i, j)] = *val;
                }
            }
        }
        h_tilde
    }

    fn validate(&self, params: &MultiPseudorangeParams) -> Result<(), EstimationError> {
        ensure!(
            params.sat_pos.len() == self.channels,
            DimensionMismatchSnafu {
                action: "satellite channels",
                expected: self.channels,
                got: params.sat_pos.len()
            }
        );
        Ok(())
    }
}

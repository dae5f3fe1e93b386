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

use crate::linalg::{DMatrix, DVector, Vector3};
use crate::md::trajectory::Trajectory;
use crate::od::estimate::KfEstimate;
use crate::time::Epoch;
use crate::EstimationError;
use std::fmt;

/// Solution of a single epoch least squares fit of the position and the clock bias `[x, y, z, b]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LsqSolution {
    pub estimate: DVector<f64>,
    /// Covariance of the estimate, computed as `(J' W J)^-1` at the solution
    pub covariance: DMatrix<f64>,
    pub num_iterations: usize,
    /// Root mean square of the (unweighted) postfit residuals
    pub final_rms: f64,
    /// Norm of the last correction applied to the estimate
    pub final_step_norm: f64,
    pub num_obs: usize,
}

impl LsqSolution {
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.estimate[0], self.estimate[1], self.estimate[2])
    }

    pub fn clock_bias(&self) -> f64 {
        self.estimate[3]
    }

    /// Converts this solution into a filter estimate at the provided epoch.
    pub fn to_estimate(&self, epoch: Epoch) -> KfEstimate {
        KfEstimate::from_covar(epoch, self.estimate.clone(), self.covariance.clone())
    }
}

impl fmt::Display for LsqSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Observations: {}", self.num_obs)?;
        writeln!(f, "Iterations: {}", self.num_iterations)?;
        writeln!(f, "Final RMS: {:.6}", self.final_rms)?;
        writeln!(
            f,
            "Position: [{:.6}, {:.6}, {:.6}]\tBias: {:.6}",
            self.estimate[0], self.estimate[1], self.estimate[2], self.estimate[3]
        )?;
        write!(f, "Covariance:\n{:.3e}", self.covariance)
    }
}

/// Solution of a batch least squares fit of the position, the clock bias at the reference epoch and the bias
/// drift `[x, y, z, b0, α]`, where the bias at `t` is `b0 + α (t - t_ref)` with the time in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLsqSolution {
    pub reference_epoch: Epoch,
    pub estimate: DVector<f64>,
    /// Covariance of the estimate, computed as `(J' W J)^-1` at the solution
    pub covariance: DMatrix<f64>,
    pub num_iterations: usize,
    pub final_rms: f64,
    pub final_step_norm: f64,
    pub num_obs: usize,
}

impl BatchLsqSolution {
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.estimate[0], self.estimate[1], self.estimate[2])
    }

    pub fn bias_drift(&self) -> f64 {
        self.estimate[4]
    }

    /// Clock bias at the provided epoch, from the linear drift model
    pub fn clock_bias(&self, epoch: Epoch) -> f64 {
        self.estimate[3] + self.estimate[4] * (epoch - self.reference_epoch).to_seconds()
    }

    /// Evaluates the solution on the provided epochs, as the states `[x, y, z, b(t)]`.
    pub fn trajectory(&self, epochs: &[Epoch]) -> Result<Trajectory, EstimationError> {
        let states = epochs
            .iter()
            .map(|epoch| {
                DVector::from_vec(vec![
                    self.estimate[0],
                    self.estimate[1],
                    self.estimate[2],
                    self.clock_bias(*epoch),
                ])
            })
            .collect();
        Ok(Trajectory::new(epochs.to_vec(), states)?.with_name("batch LSQ"))
    }
}

impl fmt::Display for BatchLsqSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reference epoch: {}", self.reference_epoch)?;
        writeln!(f, "Observations: {}", self.num_obs)?;
        writeln!(f, "Iterations: {}", self.num_iterations)?;
        writeln!(f, "Final RMS: {:.6}", self.final_rms)?;
        writeln!(
            f,
            "Position: [{:.6}, {:.6}, {:.6}]\tBias: {:.6}\tDrift: {:.6e}",
            self.estimate[0], self.estimate[1], self.estimate[2], self.estimate[3], self.estimate[4]
        )?;
        write!(f, "Covariance:\n{:.3e}", self.covariance)
    }
}

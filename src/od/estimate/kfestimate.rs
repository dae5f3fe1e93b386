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

use crate::linalg::{DMatrix, DVector};
use crate::time::Epoch;
use std::fmt;

/// Kalman filter Estimate
#[derive(Debug, Clone, PartialEq)]
pub struct KfEstimate {
    /// Epoch of this estimate
    pub epoch: Epoch,
    /// The estimated state (the posterior mean, or the predicted mean if this is a prediction)
    pub state: DVector<f64>,
    /// The Covariance of this estimate
    pub covar: DMatrix<f64>,
    /// The predicted covariance of this estimate
    pub covar_bar: DMatrix<f64>,
    /// Whether or not this is a predicted estimate from a time update, or an estimate from a measurement
    pub predicted: bool,
    /// The state transition matrix (dynamics jacobian) used to compute this estimate
    pub stm: DMatrix<f64>,
}

impl KfEstimate {
    /// Initializes a new filter estimate from the state and the full covariance
    pub fn from_covar(epoch: Epoch, state: DVector<f64>, covar: DMatrix<f64>) -> Self {
        let n = state.len();
        Self {
            epoch,
            state,
            covar_bar: covar.clone(),
            covar,
            predicted: true,
            stm: DMatrix::identity(n, n),
        }
    }

    /// Initializes a new filter estimate from the state and the diagonal of the covariance
    pub fn from_diag(epoch: Epoch, state: DVector<f64>, diag: &[f64]) -> Self {
        let covar = DMatrix::from_diagonal(&DVector::from_column_slice(diag));
        Self::from_covar(epoch, state, covar)
    }

    /// Dimension of the estimated state
    pub fn dim(&self) -> usize {
        self.state.len()
    }

    /// One sigma of each component of the state, from the diagonal of the covariance
    pub fn sigmas(&self) -> DVector<f64> {
        self.covar.diagonal().map(|v| v.max(0.0).sqrt())
    }

    /// Returns whether the provided deviation from this estimate is within `sigma` standard deviations on each axis.
    /// The 68-95-99.7 rule is a good way to assess whether the filter is operating normally.
    pub fn within_sigma(&self, deviation: &DVector<f64>, sigma: f64) -> bool {
        deviation
            .iter()
            .zip(self.sigmas().iter())
            .all(|(dev, one_sigma)| dev.abs() <= sigma * one_sigma)
    }

    /// Returns whether the provided deviation is within 3 sigma, which represent 99.7% for a Normal distribution
    pub fn within_3sigma(&self, deviation: &DVector<f64>) -> bool {
        self.within_sigma(deviation, 3.0)
    }
}

impl fmt::Display for KfEstimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = if self.predicted {
            "Prediction"
        } else {
            "Estimate"
        };
        let fmt_state: Vec<String> = self.state.iter().map(|v| format!("{v:.6}")).collect();
        let fmt_cov: Vec<String> = self
            .covar
            .diagonal()
            .iter()
            .map(|v| format!("{v:e}"))
            .collect();
        write!(
            f,
            "=== {} @ {} ===\nstate [{}]\nvariances [{}]\n",
            word,
            self.epoch,
            fmt_state.join(", "),
            fmt_cov.join(", ")
        )
    }
}

impl fmt::LowerExp for KfEstimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "=== PREDICTED: {} ===\nEstState {:e} Covariance {:e}\n=====================",
            self.predicted, self.state, self.covar
        )
    }
}

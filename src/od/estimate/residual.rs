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

use crate::linalg::DVector;
use crate::time::Epoch;
use std::fmt;

/// Stores the residual of a measurement update.
///
/// The prefit, postfit and noise vectors only hold the measurement channels which were used in the update: channels
/// with a non finite real or computed observation are excluded, and `used` flags which channels remain.
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    /// Date time of this Residual
    pub epoch: Epoch,
    /// The prefit residual in the units of the measurement type
    pub prefit: DVector<f64>,
    /// The postfit residual in the units of the measurement type
    pub postfit: DVector<f64>,
    /// The prefit residual ratio computed as the Mahalanobis distance, i.e. it is always positive
    /// and computed as `sqrt(r' * (H*P*H' + R)^-1 * r)`, where `r` is the prefit residual.
    pub ratio: f64,
    /// The measurement noise (one sigma) of each used channel.
    pub msr_noise: DVector<f64>,
    /// Whether or not this was rejected
    pub rejected: bool,
    /// For each measurement channel, whether it was used in this update
    pub used: Vec<bool>,
    /// The real observation, over the used channels
    pub real_obs: DVector<f64>,
    /// The computed observation as expected from the predicted state, over the used channels
    pub computed_obs: DVector<f64>,
}

impl Residual {
    /// A residual for an update where no measurement channel was available.
    pub fn no_data(epoch: Epoch, channels: usize) -> Self {
        Self {
            epoch,
            prefit: DVector::zeros(0),
            postfit: DVector::zeros(0),
            ratio: 0.0,
            msr_noise: DVector::zeros(0),
            rejected: false,
            used: vec![false; channels],
            real_obs: DVector::zeros(0),
            computed_obs: DVector::zeros(0),
        }
    }

    /// Flags a Residual as rejected.
    pub fn rejected(
        epoch: Epoch,
        prefit: DVector<f64>,
        ratio: f64,
        msr_covar: DVector<f64>,
        used: Vec<bool>,
        real_obs: DVector<f64>,
        computed_obs: DVector<f64>,
    ) -> Self {
        Self {
            epoch,
            postfit: DVector::zeros(prefit.len()),
            prefit,
            ratio,
            msr_noise: msr_covar.map(|x| x.sqrt()),
            rejected: true,
            used,
            real_obs,
            computed_obs,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn accepted(
        epoch: Epoch,
        prefit: DVector<f64>,
        postfit: DVector<f64>,
        ratio: f64,
        msr_covar: DVector<f64>,
        used: Vec<bool>,
        real_obs: DVector<f64>,
        computed_obs: DVector<f64>,
    ) -> Self {
        Self {
            epoch,
            prefit,
            postfit,
            ratio,
            msr_noise: msr_covar.map(|x| x.sqrt()),
            rejected: false,
            used,
            real_obs,
            computed_obs,
        }
    }

    /// Number of measurement channels used in this update
    pub fn num_used(&self) -> usize {
        self.prefit.len()
    }

    /// Index in the residual vectors of the provided measurement channel, if that channel was used
    fn index_of(&self, channel: usize) -> Option<usize> {
        if !*self.used.get(channel)? {
            return None;
        }
        Some(self.used[..channel].iter().filter(|u| **u).count())
    }

    /// Returns the prefit for this measurement channel, if available
    pub fn prefit(&self, channel: usize) -> Option<f64> {
        self.index_of(channel).map(|idx| self.prefit[idx])
    }

    /// Returns the postfit for this measurement channel, if available
    pub fn postfit(&self, channel: usize) -> Option<f64> {
        self.index_of(channel).map(|idx| self.postfit[idx])
    }

    /// Returns the measurement noise for this measurement channel, if available
    pub fn msr_noise(&self, channel: usize) -> Option<f64> {
        self.index_of(channel).map(|idx| self.msr_noise[idx])
    }
}

impl fmt::Display for Residual {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Residual @ {} from {} channels{}: ratio = {:.3}\tprefit {:e}\tpostfit {:e}",
            self.epoch,
            self.num_used(),
            if self.rejected { " (rejected)" } else { "" },
            self.ratio,
            self.prefit.transpose(),
            self.postfit.transpose()
        )
    }
}

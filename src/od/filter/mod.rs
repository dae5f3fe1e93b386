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

use crate::io::ConfigRepr;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

pub mod ekf;
pub use ekf::ExtendedKalmanFilter;

/// Reject measurements whose prefit residual ratio is larger than the provided number of sigmas.
///
/// The residual ratio is the Mahalanobis distance of the prefit residual with respect to the innovation covariance
/// `H*P*H' + R`. A value of 3.0 is a good default.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidRejectCrit {
    pub num_sigmas: f64,
}

impl Default for ResidRejectCrit {
    fn default() -> Self {
        Self { num_sigmas: 3.0 }
    }
}

impl fmt::Display for ResidRejectCrit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reject residual ratios above {} sigmas", self.num_sigmas)
    }
}

impl ConfigRepr for ResidRejectCrit {}

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

/// Provides Estimate handling functionalities.
pub mod estimate;

/// Provides the extended Kalman filter.
pub mod filter;
pub use filter::ExtendedKalmanFilter;

/// Provides the iterative and batch least squares estimators of a position and a clock bias.
pub mod lsq;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::estimate::*;
    pub use super::filter::*;
    pub use super::lsq::*;

    pub use crate::md::trajectory::Trajectory;
    pub use crate::models::*;
    pub use crate::time::{Duration, Epoch, TimeUnits, Unit};
    pub use crate::EstimationError;
}

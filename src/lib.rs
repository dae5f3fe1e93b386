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

/*! # trajest

Estimation of the time history of a dynamical system from noisy and possibly irregular measurements.

Three estimator families share the same dynamics and measurement model interfaces ([models]), so their outputs
are numerically comparable on identical inputs:
- the iterative (single epoch) and batch (multi epoch, linear bias drift) least squares solvers in [od::lsq];
- the recursive Extended Kalman Filter in [od::filter];
- the fixed horizon trajectory smoother in [md::nlp], which jointly estimates a whole trajectory by minimizing
  the weighted dynamics and measurement residuals with a Levenberg-Marquardt solver.

Every estimator produces a [md::trajectory::Trajectory] as its final output.
*/

/// Dynamics and measurement model interfaces, and the concrete models used in the GNSS and single integrator scenarios.
pub mod models;

/// All of the state estimation tools: estimates, residuals, the EKF and the least squares solvers.
pub mod od;

/// Trajectory level tools: the trajectory estimate and the fixed horizon NLP smoother.
pub mod md;

/// Configuration loading.
pub mod io;

/// Open loop simulation and synthetic measurement generation.
pub mod sim;

/// Utility functions shared by different modules, mostly covariance safeguards.
pub mod utils;

mod errors;
/// Estimators (almost) never panic and functions which may fail will return an error.
pub use self::errors::EstimationError;

#[macro_use]
extern crate log;
extern crate hifitime;
extern crate nalgebra as na;

/// Re-export of hifitime
pub mod time {
    pub use hifitime::*;
}

/// Re-export nalgebra
pub mod linalg {
    pub use na::base::*;
}

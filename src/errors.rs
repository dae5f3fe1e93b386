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

use crate::time::Epoch;
use snafu::prelude::Snafu;

/// Errors raised by the models and the estimators.
///
/// Dimension and binding errors are programming errors of the caller and are raised when a model, a measurement
/// or a cost is registered. Numerical failures are raised by the operation which encountered them and never
/// corrupt the estimator that raised them.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EstimationError {
    #[snafu(display("dimension mismatch for {action}: expected {expected}, got {got}"))]
    DimensionMismatch {
        action: &'static str,
        expected: usize,
        got: usize,
    },
    #[snafu(display("innovation covariance H*P*H' + R is singular"))]
    SingularInnovationCovariance,
    #[snafu(display("rank deficient problem: rank {rank} for {unknowns} unknowns"))]
    RankDeficient { rank: usize, unknowns: usize },
    #[snafu(display("did not converge after {iterations} iterations: {reason}"))]
    NoConvergence { iterations: usize, reason: String },
    #[snafu(display("problem already built, no more variables, costs or constraints may be added"))]
    AlreadyBuilt,
    #[snafu(display("problem must be built before it is solved"))]
    NotBuilt,
    #[snafu(display("problem was already solved, create a new instance to solve again"))]
    AlreadySolved,
    #[snafu(display("problem has not been solved successfully"))]
    NotSolved,
    #[snafu(display("residual @ {epoch} does not map to any step of the horizon"))]
    UnboundResidual { epoch: Epoch },
    #[snafu(display("unknown variable `{name}`"))]
    UnknownVariable { name: String },
    #[snafu(display("variable `{name}` already declared"))]
    DuplicateVariable { name: String },
    #[snafu(display("{what} must be symmetric positive definite"))]
    InvalidWeight { what: &'static str },
    #[snafu(display("time must not decrease: {next} is before {prev}"))]
    NonMonotonicTime { prev: Epoch, next: Epoch },
    #[snafu(display("invalid horizon: {details}"))]
    InvalidHorizon { details: String },
    #[snafu(display("invalid model parameters: {details}"))]
    InvalidParameters { details: String },
}

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

/// Provides the trajectory estimate container.
pub mod trajectory;

/// Provides the fixed horizon trajectory estimation problem, solved as a nonlinear least squares problem.
pub mod nlp;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::nlp::*;
    pub use super::trajectory::Trajectory;
    pub use crate::models::*;
    pub use crate::time::{Duration, Epoch, TimeUnits, Unit};
    pub use crate::EstimationError;
}

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

use crate::io::{maybe_duration_from_str, maybe_duration_to_str, ConfigRepr};
use crate::time::Duration;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use typed_builder::TypedBuilder;

fn default_patience() -> usize {
    100
}
fn default_tol() -> f64 {
    1e-10
}
fn default_gtol() -> f64 {
    0.0
}
fn default_stepbound() -> f64 {
    100.0
}
fn default_constraint_weight() -> f64 {
    1e6
}

/// Settings of the Levenberg-Marquardt solver of the trajectory estimation problem.
#[derive(Clone, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct NlpSolverConfig {
    /// The solver stops after `patience * (n + 1)` evaluations, where `n` is the number of decision variables
    #[builder(default = default_patience())]
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Relative tolerance on the decrease of the cost
    #[builder(default = default_tol())]
    #[serde(default = "default_tol")]
    pub ftol: f64,
    /// Relative tolerance on the change of the decision variables
    #[builder(default = default_tol())]
    #[serde(default = "default_tol")]
    pub xtol: f64,
    /// Tolerance on the orthogonality between the residuals and the columns of the jacobian
    #[builder(default = default_gtol())]
    #[serde(default = "default_gtol")]
    pub gtol: f64,
    /// Factor for the initial step bound
    #[builder(default = default_stepbound())]
    #[serde(default = "default_stepbound")]
    pub stepbound: f64,
    /// Weight of the penalties which enforce the state bounds and the state constraints
    #[builder(default = default_constraint_weight())]
    #[serde(default = "default_constraint_weight")]
    pub constraint_weight: f64,
    /// Wall clock budget of the solve
    #[builder(default)]
    #[serde(
        default,
        serialize_with = "maybe_duration_to_str",
        deserialize_with = "maybe_duration_from_str"
    )]
    pub max_duration: Option<Duration>,
}

impl Default for NlpSolverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConfigRepr for NlpSolverConfig {}

impl fmt::Display for NlpSolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LM solver: patience {}, ftol {:e}, xtol {:e}, gtol {:e}, constraint weight {:e}",
            self.patience, self.ftol, self.xtol, self.gtol, self.constraint_weight
        )?;
        if let Some(budget) = self.max_duration {
            write!(f, ", budget {budget}")?;
        }
        Ok(())
    }
}

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

extern crate levenberg_marquardt;

use super::costs::{CostBlock, CostKind};
use crate::linalg::storage::Owned;
use crate::linalg::{DMatrix, DVector, Dyn};
use crate::EstimationError;
use levenberg_marquardt::LeastSquaresProblem;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::Instant;

/// Sum of the squared weighted residuals of each family of costs.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CostBreakdown {
    pub dynamics: f64,
    pub measurement: f64,
    pub constraint: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.dynamics + self.measurement + self.constraint
    }
}

impl fmt::Display for CostBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total cost {:.6e} (dynamics {:.6e}, measurements {:.6e}, constraints {:.6e})",
            self.total(),
            self.dynamics,
            self.measurement,
            self.constraint
        )
    }
}

/// The assembled trajectory estimation problem: an unconstrained nonlinear least squares problem over the
/// concatenation of all of the variable blocks.
pub struct TrajectoryProblem {
    params: DVector<f64>,
    costs: Vec<Box<dyn CostBlock>>,
    num_residuals: usize,
    deadline: Option<Instant>,
    timed_out: Cell<bool>,
    failure: RefCell<Option<EstimationError>>,
}

impl TrajectoryProblem {
    pub(crate) fn new(initial_guess: DVector<f64>, costs: Vec<Box<dyn CostBlock>>) -> Self {
        let num_residuals = costs.iter().map(|cost| cost.rows()).sum();
        Self {
            params: initial_guess,
            costs,
            num_residuals,
            deadline: None,
            timed_out: Cell::new(false),
            failure: RefCell::new(None),
        }
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Number of weighted residuals
    pub fn num_residuals(&self) -> usize {
        self.num_residuals
    }

    /// Number of decision variables
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.get()
    }

    /// Returns the first model failure encountered while solving, if any.
    pub(crate) fn take_failure(&self) -> Option<EstimationError> {
        self.failure.borrow_mut().take()
    }

    /// Evaluates all of the residuals and, if requested, the jacobian at the provided decision vector.
    pub fn evaluate(
        &self,
        x: &DVector<f64>,
        with_jacobian: bool,
    ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), EstimationError> {
        let mut resid = DVector::zeros(self.num_residuals);
        let mut jac = with_jacobian.then(|| DMatrix::zeros(self.num_residuals, x.len()));
        let mut row = 0;
        for cost in &self.costs {
            cost.evaluate(x, row, &mut resid, jac.as_mut())?;
            row += cost.rows();
        }
        Ok((resid, jac))
    }

    /// Computes the cost of each family at the provided decision vector.
    pub fn breakdown(&self, x: &DVector<f64>) -> Result<CostBreakdown, EstimationError> {
        let (resid, _) = self.evaluate(x, false)?;
        let mut breakdown = CostBreakdown::default();
        let mut row = 0;
        for cost in &self.costs {
            let sq = resid.rows(row, cost.rows()).norm_squared();
            match cost.kind() {
                CostKind::Dynamics => breakdown.dynamics += sq,
                CostKind::Measurement => breakdown.measurement += sq,
                CostKind::Constraint => breakdown.constraint += sq,
            }
            row += cost.rows();
        }
        Ok(breakdown)
    }

    /// Returns false, and flags the problem, once the wall clock budget is exhausted.
    fn within_budget(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                if !self.timed_out.get() {
                    warn!("trajectory problem exhausted its time budget");
                }
                self.timed_out.set(true);
                return false;
            }
        }
        true
    }

    fn record_failure(&self, err: EstimationError) {
        error!("trajectory problem evaluation failed: {err}");
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some(err);
        }
    }
}

// Returning None from either evaluation stops the solver.
impl LeastSquaresProblem<f64, Dyn, Dyn> for TrajectoryProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        if !self.within_budget() {
            return None;
        }
        match self.evaluate(&self.params, false) {
            Ok((resid, _)) => {
                trace!("cost {:.6e}", resid.norm_squared());
                Some(resid)
            }
            Err(e) => {
                self.record_failure(e);
                None
            }
        }
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        if !self.within_budget() {
            return None;
        }
        match self.evaluate(&self.params, true) {
            Ok((_, jac)) => jac,
            Err(e) => {
                self.record_failure(e);
                None
            }
        }
    }
}

impl fmt::Debug for TrajectoryProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrajectoryProblem with {} residuals in {} blocks over {} variables",
            self.num_residuals,
            self.costs.len(),
            self.params.len()
        )
    }
}

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
use crate::models::{DynamicsModel, MeasurementModel};
use crate::utils::{mask_rows, mask_vector};
use crate::EstimationError;

/// The family of a cost, used to report the cost breakdown.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CostKind {
    Dynamics,
    Measurement,
    Constraint,
}

/// A block of weighted residuals of the trajectory problem.
///
/// Each block writes its residuals starting at the provided row of the full residual vector, and the partials of
/// those residuals with respect to the full decision vector in the same rows of the jacobian. The jacobian rows are
/// zero on entry.
pub(crate) trait CostBlock: Send {
    fn kind(&self) -> CostKind;

    fn rows(&self) -> usize;

    fn evaluate(
        &self,
        x: &DVector<f64>,
        row: usize,
        resid: &mut DVector<f64>,
        jac: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EstimationError>;
}

/// Location of a variable block in the decision vector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    pub offset: usize,
    pub steps: usize,
    pub dim: usize,
}

impl Layout {
    pub fn index(&self, step: usize) -> usize {
        self.offset + step * self.dim
    }

    pub fn state(&self, x: &DVector<f64>, step: usize) -> DVector<f64> {
        x.rows(self.index(step), self.dim).into_owned()
    }
}

/// Soft dynamics: `L' (x_{k+1} - f(x_k, u_k, dt))` for each step, where `W = L L'` is the weight.
pub(crate) struct DynamicsCost<D: DynamicsModel> {
    pub model: D,
    pub params: D::Params,
    pub layout: Layout,
    pub dt: f64,
    /// Control of each step, the last node excluded
    pub controls: Vec<DVector<f64>>,
    pub sqrt_info: DMatrix<f64>,
}

impl<D> CostBlock for DynamicsCost<D>
where
    D: DynamicsModel + Send,
    D::Params: Send,
{
    fn kind(&self) -> CostKind {
        CostKind::Dynamics
    }

    fn rows(&self) -> usize {
        self.controls.len() * self.layout.dim
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        row: usize,
        resid: &mut DVector<f64>,
        mut jac: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EstimationError> {
        let n = self.layout.dim;
        for (k, control) in self.controls.iter().enumerate() {
            let this_row = row + k * n;
            let state = self.layout.state(x, k);
            let next = self.layout.state(x, k + 1);
            let transition = self.model.propagate(&state, control, self.dt, &self.params)?;

            resid
                .rows_mut(this_row, n)
                .copy_from(&(&self.sqrt_info * (next - transition.next_state)));

            if let Some(jac) = jac.as_deref_mut() {
                jac.view_mut((this_row, self.layout.index(k)), (n, n))
                    .copy_from(&(-&self.sqrt_info * transition.state_jacobian));
                jac.view_mut((this_row, self.layout.index(k + 1)), (n, n))
                    .copy_from(&self.sqrt_info);
            }
        }
        Ok(())
    }
}

/// A measurement bound to a node of the horizon.
pub(crate) struct BoundMeasurement<P> {
    pub step: usize,
    /// Real observation over the used channels
    pub real_obs: DVector<f64>,
    pub used: Vec<bool>,
    /// Square root of the weight over the used channels
    pub sqrt_info: DMatrix<f64>,
    pub params: P,
}

/// Measurement residuals: `L' (y - h(x_k))` over the used channels of each measurement.
pub(crate) struct MeasurementCost<M: MeasurementModel> {
    pub model: M,
    pub layout: Layout,
    pub measurements: Vec<BoundMeasurement<M::Params>>,
}

impl<M> CostBlock for MeasurementCost<M>
where
    M: MeasurementModel + Send,
    M::Params: Send,
{
    fn kind(&self) -> CostKind {
        CostKind::Measurement
    }

    fn rows(&self) -> usize {
        self.measurements.iter().map(|msr| msr.real_obs.len()).sum()
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        row: usize,
        resid: &mut DVector<f64>,
        mut jac: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EstimationError> {
        let mut this_row = row;
        for msr in &self.measurements {
            let p = msr.real_obs.len();
            let state = self.layout.state(x, msr.step);
            let lin = self.model.linearize(&state, &msr.params)?;

            let computed_obs = mask_vector(&lin.computed_obs, &msr.used);
            let mut h_tilde = mask_rows(&lin.sensitivity, &msr.used);
            let mut prefit = &msr.real_obs - &computed_obs;
            // A channel which cannot be computed at this state does not contribute.
            for i in 0..p {
                if !computed_obs[i].is_finite() {
                    prefit[i] = 0.0;
                    h_tilde.row_mut(i).fill(0.0);
                }
            }

            resid
                .rows_mut(this_row, p)
                .copy_from(&(&msr.sqrt_info * prefit));

            if let Some(jac) = jac.as_deref_mut() {
                jac.view_mut((this_row, self.layout.index(msr.step)), (p, self.layout.dim))
                    .copy_from(&(-&msr.sqrt_info * h_tilde));
            }
            this_row += p;
        }
        Ok(())
    }
}

/// Hinge penalty keeping one component of the state within bounds at every node.
pub(crate) struct BoundsCost {
    pub layout: Layout,
    pub component: usize,
    pub lower: f64,
    pub upper: f64,
    pub scale: f64,
}

impl CostBlock for BoundsCost {
    fn kind(&self) -> CostKind {
        CostKind::Constraint
    }

    fn rows(&self) -> usize {
        self.layout.steps
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        row: usize,
        resid: &mut DVector<f64>,
        mut jac: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EstimationError> {
        for k in 0..self.layout.steps {
            let idx = self.layout.index(k) + self.component;
            let value = x[idx];
            let (violation, partial) = if value < self.lower {
                (self.lower - value, -1.0)
            } else if value > self.upper {
                (value - self.upper, 1.0)
            } else {
                (0.0, 0.0)
            };
            resid[row + k] = self.scale * violation;
            if let Some(jac) = jac.as_deref_mut() {
                jac[(row + k, idx)] = self.scale * partial;
            }
        }
        Ok(())
    }
}

/// Penalty pinning the state of one node to a value; non finite entries of the value are left free.
pub(crate) struct EqualityCost {
    pub layout: Layout,
    pub step: usize,
    pub value: DVector<f64>,
    pub scale: f64,
}

impl CostBlock for EqualityCost {
    fn kind(&self) -> CostKind {
        CostKind::Constraint
    }

    fn rows(&self) -> usize {
        self.value.iter().filter(|v| v.is_finite()).count()
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        row: usize,
        resid: &mut DVector<f64>,
        mut jac: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EstimationError> {
        let mut this_row = row;
        for (i, target) in self.value.iter().enumerate() {
            if !target.is_finite() {
                continue;
            }
            let idx = self.layout.index(self.step) + i;
            resid[this_row] = self.scale * (x[idx] - target);
            if let Some(jac) = jac.as_deref_mut() {
                jac[(this_row, idx)] = self.scale;
            }
            this_row += 1;
        }
        Ok(())
    }
}

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

use crate::errors::{
    AlreadyBuiltSnafu, AlreadySolvedSnafu, DimensionMismatchSnafu, DuplicateVariableSnafu,
    EstimationError, InvalidHorizonSnafu, NoConvergenceSnafu, NotBuiltSnafu, NotSolvedSnafu,
    UnboundResidualSnafu, UnknownVariableSnafu,
};
use crate::linalg::{DMatrix, DVector};
use crate::md::trajectory::Trajectory;
use crate::models::{DynamicsModel, MeasurementModel};
use crate::time::{Duration, Epoch, TimeUnits};
use crate::utils::{ensure_monotonic, mask_square, mask_vector, nearest_index, sqrt_information};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use snafu::ensure;
use std::fmt;
use std::time::Instant;

mod config;
mod costs;
mod problem;

pub use config::NlpSolverConfig;
pub use problem::{CostBreakdown, TrajectoryProblem};

use costs::{
    BoundMeasurement, BoundsCost, CostBlock, DynamicsCost, EqualityCost, Layout, MeasurementCost,
};

/// Handle on a named block of decision variables: one state per node of the horizon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableBlock {
    name: String,
    index: usize,
    layout: Layout,
}

impl VariableBlock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> usize {
        self.layout.steps
    }

    pub fn dim(&self) -> usize {
        self.layout.dim
    }
}

/// Summary of the solve of a trajectory estimation problem.
#[derive(Clone, Debug, PartialEq)]
pub struct NlpReport {
    /// Number of residual evaluations
    pub evaluations: usize,
    /// Costs at the solution
    pub costs: CostBreakdown,
    /// Why the solver stopped
    pub termination: String,
}

impl NlpReport {
    pub fn total_cost(&self) -> f64 {
        self.costs.total()
    }
}

impl fmt::Display for NlpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} evaluations: {}",
            self.termination, self.evaluations, self.costs
        )
    }
}

/// The stages of a trajectory estimation problem, which may only move forward.
enum Stage {
    Declaring {
        costs: Vec<Box<dyn CostBlock>>,
    },
    Built(TrajectoryProblem),
    Solved {
        solution: DVector<f64>,
        report: NlpReport,
    },
    Failed,
}

/// Estimates the state trajectory over a fixed horizon by minimizing the weighted dynamics and measurement residuals.
///
/// The horizon `[start, end]` is split into `N` steps, i.e. `N + 1` nodes where node `k` is at
/// `start + k (end - start) / N`. The dynamics are soft: each step contributes the residual
/// `L' (x_{k+1} - f(x_k, u_k, dt))` where `W = L L'` is the weight of the dynamics (the inverse of the process
/// noise). Each measurement is bound to the node nearest to its epoch. State bounds and state constraints are
/// enforced as penalties weighted by [`NlpSolverConfig::constraint_weight`]. The resulting nonlinear least
/// squares problem is solved with Levenberg-Marquardt.
///
/// The problem is single use: declare the variables, add the costs, build, solve, and extract the solution.
pub struct FixedTimeEstimationNlp {
    horizon: usize,
    start: Epoch,
    end: Epoch,
    state_dim: usize,
    control_dim: usize,
    nodes: Vec<Epoch>,
    config: NlpSolverConfig,
    variables: Vec<VariableBlock>,
    initial_guess: Vec<f64>,
    stage: Stage,
}

impl FixedTimeEstimationNlp {
    /// Initializes a new problem over `horizon` steps between `start` and `end`, for states of dimension
    /// `state_dim` and controls of dimension `control_dim`.
    pub fn new(
        horizon: usize,
        start: Epoch,
        end: Epoch,
        state_dim: usize,
        control_dim: usize,
    ) -> Result<Self, EstimationError> {
        ensure!(
            horizon > 0,
            InvalidHorizonSnafu {
                details: "at least one step is needed".to_string()
            }
        );
        ensure!(
            end > start,
            InvalidHorizonSnafu {
                details: format!("end {end} must be after start {start}")
            }
        );
        ensure!(
            state_dim > 0,
            InvalidHorizonSnafu {
                details: "state dimension must be positive".to_string()
            }
        );

        let step_s = (end - start).to_seconds() / horizon as f64;
        let mut nodes: Vec<Epoch> = (0..horizon)
            .map(|k| start + (step_s * k as f64).seconds())
            .collect();
        nodes.push(end);

        Ok(Self {
            horizon,
            start,
            end,
            state_dim,
            control_dim,
            nodes,
            config: NlpSolverConfig::default(),
            variables: Vec::new(),
            initial_guess: Vec::new(),
            stage: Stage::Declaring { costs: Vec::new() },
        })
    }

    /// Sets the solver configuration, including the weight of the constraints which are added afterward.
    pub fn with_config(mut self, config: NlpSolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &NlpSolverConfig {
        &self.config
    }

    /// Number of steps of the horizon
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Duration of one step
    pub fn step(&self) -> Duration {
        ((self.end - self.start).to_seconds() / self.horizon as f64).seconds()
    }

    /// Epochs of the nodes of the horizon
    pub fn nodes(&self) -> &[Epoch] {
        &self.nodes
    }

    /// Returns the assembled problem, once built and until it is solved.
    pub fn problem(&self) -> Option<&TrajectoryProblem> {
        match &self.stage {
            Stage::Built(problem) => Some(problem),
            _ => None,
        }
    }

    fn costs_mut(&mut self) -> Result<&mut Vec<Box<dyn CostBlock>>, EstimationError> {
        match &mut self.stage {
            Stage::Declaring { costs } => Ok(costs),
            _ => AlreadyBuiltSnafu.fail(),
        }
    }

    /// Ensures that the handle belongs to this problem.
    fn check_block(&self, block: &VariableBlock) -> Result<Layout, EstimationError> {
        match self.variables.get(block.index) {
            Some(known) if known == block => Ok(known.layout),
            _ => UnknownVariableSnafu {
                name: block.name.clone(),
            }
            .fail(),
        }
    }

    /// Declares a block of decision variables, one state of `dim` components for each of the `steps` nodes.
    pub fn add_variables(
        &mut self,
        name: &str,
        steps: usize,
        dim: usize,
    ) -> Result<VariableBlock, EstimationError> {
        self.costs_mut()?;
        ensure!(
            steps == self.horizon + 1,
            DimensionMismatchSnafu {
                action: "variable steps",
                expected: self.horizon + 1,
                got: steps
            }
        );
        ensure!(
            dim == self.state_dim,
            DimensionMismatchSnafu {
                action: "variable dimension",
                expected: self.state_dim,
                got: dim
            }
        );
        ensure!(
            self.variables.iter().all(|v| v.name != name),
            DuplicateVariableSnafu { name }
        );

        let block = VariableBlock {
            name: name.to_string(),
            index: self.variables.len(),
            layout: Layout {
                offset: self.initial_guess.len(),
                steps,
                dim,
            },
        };
        self.initial_guess.resize(self.initial_guess.len() + steps * dim, 0.0);
        debug!("declared `{name}`: {steps} steps of {dim} components");
        self.variables.push(block.clone());
        Ok(block)
    }

    /// Sets the initial guess of a variable block, one state per node (zero by default).
    pub fn set_initial_guess(
        &mut self,
        block: &VariableBlock,
        states: &[DVector<f64>],
    ) -> Result<(), EstimationError> {
        self.costs_mut()?;
        let layout = self.check_block(block)?;
        ensure!(
            states.len() == layout.steps,
            DimensionMismatchSnafu {
                action: "initial guess steps",
                expected: layout.steps,
                got: states.len()
            }
        );
        for (k, state) in states.iter().enumerate() {
            ensure!(
                state.len() == layout.dim,
                DimensionMismatchSnafu {
                    action: "initial guess state",
                    expected: layout.dim,
                    got: state.len()
                }
            );
            let idx = layout.index(k);
            self.initial_guess[idx..idx + layout.dim].copy_from_slice(state.as_slice());
        }
        Ok(())
    }

    /// Index of the node bound to this epoch, if it is within half a step of the horizon.
    fn bind(&self, epoch: Epoch) -> Result<usize, EstimationError> {
        let half_step = self.step().to_seconds() / 2.0;
        match nearest_index(&self.nodes, epoch) {
            Some(idx)
                if (epoch - self.nodes[idx]).to_seconds().abs() <= half_step * (1.0 + 1e-9) =>
            {
                Ok(idx)
            }
            _ => UnboundResidualSnafu { epoch }.fail(),
        }
    }

    /// Adds the soft dynamics constraints between all consecutive nodes of the block.
    ///
    /// The control of step `k` is the control sample whose epoch is the nearest to node `k`. If the model has no
    /// control, the times and controls may be empty. The weight is the inverse of the process noise of one step.
    pub fn add_dynamics<D>(
        &mut self,
        model: D,
        block: &VariableBlock,
        times: &[Epoch],
        controls: &[DVector<f64>],
        weight: &DMatrix<f64>,
        params: D::Params,
    ) -> Result<(), EstimationError>
    where
        D: DynamicsModel + Send + 'static,
        D::Params: Send + 'static,
    {
        self.costs_mut()?;
        let layout = self.check_block(block)?;
        ensure!(
            model.state_dim() == self.state_dim,
            DimensionMismatchSnafu {
                action: "dynamics model state",
                expected: self.state_dim,
                got: model.state_dim()
            }
        );
        ensure!(
            model.control_dim() == self.control_dim,
            DimensionMismatchSnafu {
                action: "dynamics model control",
                expected: self.control_dim,
                got: model.control_dim()
            }
        );
        ensure!(
            times.len() == controls.len(),
            DimensionMismatchSnafu {
                action: "control samples",
                expected: times.len(),
                got: controls.len()
            }
        );
        for control in controls {
            ensure!(
                control.len() == self.control_dim,
                DimensionMismatchSnafu {
                    action: "control",
                    expected: self.control_dim,
                    got: control.len()
                }
            );
        }
        ensure_monotonic(times)?;
        model.validate(&params)?;
        let sqrt_info = sqrt_information(weight, self.state_dim, "dynamics weight")?;

        let controls: Vec<DVector<f64>> = self.nodes[..self.horizon]
            .iter()
            .map(|node| match nearest_index(times, *node) {
                Some(idx) => Ok(controls[idx].clone()),
                None if self.control_dim == 0 => Ok(DVector::zeros(0)),
                None => DimensionMismatchSnafu {
                    action: "control samples",
                    expected: 1_usize,
                    got: 0_usize,
                }
                .fail(),
            })
            .collect::<Result<_, _>>()?;

        let cost = DynamicsCost {
            model,
            params,
            layout,
            dt: self.step().to_seconds(),
            controls,
            sqrt_info,
        };
        debug!("dynamics on `{}`: {} residuals", block.name, cost.rows());
        self.costs_mut()?.push(Box::new(cost));
        Ok(())
    }

    /// Adds the weighted measurement residuals of the block, each measurement bound to the node nearest to its epoch.
    ///
    /// Non finite entries of a measurement, and channels which the model cannot compute at the initial guess, are
    /// excluded (the weight is restricted to the remaining channels). The parameters are either shared by all of
    /// the measurements (one entry) or given for each measurement.
    pub fn add_residual_cost<M>(
        &mut self,
        model: M,
        block: &VariableBlock,
        times: &[Epoch],
        measurements: &[DVector<f64>],
        weight: &DMatrix<f64>,
        params: &[M::Params],
    ) -> Result<(), EstimationError>
    where
        M: MeasurementModel + Send + 'static,
        M::Params: Send + 'static,
    {
        self.costs_mut()?;
        let layout = self.check_block(block)?;
        let p = model.msr_dim();
        ensure!(
            model.state_dim() == self.state_dim,
            DimensionMismatchSnafu {
                action: "measurement model state",
                expected: self.state_dim,
                got: model.state_dim()
            }
        );
        ensure!(
            times.len() == measurements.len(),
            DimensionMismatchSnafu {
                action: "measurements",
                expected: times.len(),
                got: measurements.len()
            }
        );
        ensure!(
            params.len() == 1 || params.len() == times.len(),
            DimensionMismatchSnafu {
                action: "measurement parameters",
                expected: times.len(),
                got: params.len()
            }
        );
        ensure_monotonic(times)?;
        // Validates the full weight once, its restrictions are then positive definite too.
        sqrt_information(weight, p, "measurement weight")?;

        let initial_guess = DVector::from_column_slice(&self.initial_guess);
        let mut bound = Vec::with_capacity(times.len());
        for (i, (epoch, real_obs)) in times.iter().zip(measurements).enumerate() {
            ensure!(
                real_obs.len() == p,
                DimensionMismatchSnafu {
                    action: "measurement",
                    expected: p,
                    got: real_obs.len()
                }
            );
            let step = self.bind(*epoch)?;
            let msr_params = if params.len() == 1 {
                params[0].clone()
            } else {
                params[i].clone()
            };
            model.validate(&msr_params)?;

            let guess = layout.state(&initial_guess, step);
            let computed = model.linearize(&guess, &msr_params)?.computed_obs;
            let used: Vec<bool> = real_obs
                .iter()
                .zip(computed.iter())
                .map(|(real, comp)| real.is_finite() && comp.is_finite())
                .collect();
            if !used.iter().any(|u| *u) {
                debug!("no usable channel in measurement @ {epoch}");
                continue;
            }

            bound.push(BoundMeasurement {
                step,
                real_obs: mask_vector(real_obs, &used),
                sqrt_info: sqrt_information(
                    &mask_square(weight, &used),
                    used.iter().filter(|u| **u).count(),
                    "measurement weight",
                )?,
                used,
                params: msr_params,
            });
        }

        let cost = MeasurementCost {
            model,
            layout,
            measurements: bound,
        };
        debug!(
            "{} measurements on `{}`: {} residuals",
            cost.measurements.len(),
            block.name,
            cost.rows()
        );
        self.costs_mut()?.push(Box::new(cost));
        Ok(())
    }

    /// Keeps one component of the state within `[lower, upper]` at every node, as a penalty.
    pub fn add_state_bounds(
        &mut self,
        block: &VariableBlock,
        component: usize,
        lower: f64,
        upper: f64,
    ) -> Result<(), EstimationError> {
        self.costs_mut()?;
        let layout = self.check_block(block)?;
        ensure!(
            component < layout.dim,
            DimensionMismatchSnafu {
                action: "bounded component",
                expected: layout.dim,
                got: component
            }
        );
        ensure!(
            lower <= upper,
            InvalidHorizonSnafu {
                details: format!("lower bound {lower} above upper bound {upper}")
            }
        );
        let scale = self.config.constraint_weight.sqrt();
        self.costs_mut()?.push(Box::new(BoundsCost {
            layout,
            component,
            lower,
            upper,
            scale,
        }));
        Ok(())
    }

    /// Pins the state of one node to the provided value, as a penalty. Non finite components are left free.
    pub fn add_state_constraint(
        &mut self,
        block: &VariableBlock,
        step: usize,
        value: &DVector<f64>,
    ) -> Result<(), EstimationError> {
        self.costs_mut()?;
        let layout = self.check_block(block)?;
        ensure!(
            step < layout.steps,
            DimensionMismatchSnafu {
                action: "constrained step",
                expected: layout.steps,
                got: step
            }
        );
        ensure!(
            value.len() == layout.dim,
            DimensionMismatchSnafu {
                action: "constrained state",
                expected: layout.dim,
                got: value.len()
            }
        );
        let scale = self.config.constraint_weight.sqrt();
        self.costs_mut()?.push(Box::new(EqualityCost {
            layout,
            step,
            value: value.clone(),
            scale,
        }));
        Ok(())
    }

    /// Assembles all of the costs into the trajectory problem. No variable nor cost may be added afterward.
    pub fn build(&mut self) -> Result<(), EstimationError> {
        let costs = match std::mem::replace(&mut self.stage, Stage::Failed) {
            Stage::Declaring { costs } => costs,
            other => {
                self.stage = other;
                return AlreadyBuiltSnafu.fail();
            }
        };
        let problem = TrajectoryProblem::new(DVector::from_vec(self.initial_guess.clone()), costs);
        info!("built {problem:?}");
        self.stage = Stage::Built(problem);
        Ok(())
    }

    /// Solves the problem, once.
    pub fn solve(&mut self) -> Result<NlpReport, EstimationError> {
        let mut problem = match std::mem::replace(&mut self.stage, Stage::Failed) {
            Stage::Built(problem) => problem,
            Stage::Declaring { costs } => {
                self.stage = Stage::Declaring { costs };
                return NotBuiltSnafu.fail();
            }
            other => {
                self.stage = other;
                return AlreadySolvedSnafu.fail();
            }
        };

        // From here on, any failure leaves the problem in the failed stage.
        let cfg = &self.config;
        info!("solving with {cfg}");
        problem.set_deadline(cfg.max_duration.map(|budget| {
            Instant::now() + std::time::Duration::from_secs_f64(budget.to_seconds().max(0.0))
        }));

        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(cfg.patience)
            .with_ftol(cfg.ftol)
            .with_xtol(cfg.xtol)
            .with_gtol(cfg.gtol)
            .with_stepbound(cfg.stepbound)
            .minimize(problem);

        if let Some(err) = problem.take_failure() {
            return Err(err);
        }
        ensure!(
            !problem.timed_out(),
            NoConvergenceSnafu {
                iterations: report.number_of_evaluations,
                reason: "time budget exhausted".to_string()
            }
        );

        let termination = format!("{:?}", report.termination);
        if !report.termination.was_successful() {
            match &report.termination {
                // The cost cannot decrease anymore within machine precision: this is a minimum.
                TerminationReason::NoImprovementPossible(_) => {
                    warn!("solver stopped with {termination}");
                }
                _ => {
                    return NoConvergenceSnafu {
                        iterations: report.number_of_evaluations,
                        reason: termination,
                    }
                    .fail()
                }
            }
        }

        let solution = problem.params();
        let costs = problem.breakdown(&solution)?;
        let report = NlpReport {
            evaluations: report.number_of_evaluations,
            costs,
            termination,
        };
        info!("{report}");
        self.stage = Stage::Solved {
            solution,
            report: report.clone(),
        };
        Ok(report)
    }

    /// Returns the report of the solve, if it succeeded.
    pub fn report(&self) -> Option<&NlpReport> {
        match &self.stage {
            Stage::Solved { report, .. } => Some(report),
            _ => None,
        }
    }

    fn solved_layout(&self, name: &str) -> Result<(Layout, &DVector<f64>), EstimationError> {
        let layout = self
            .variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.layout)
            .ok_or_else(|| EstimationError::UnknownVariable {
                name: name.to_string(),
            })?;
        match &self.stage {
            Stage::Solved { solution, .. } => Ok((layout, solution)),
            _ => NotSolvedSnafu.fail(),
        }
    }

    /// Returns, for each of the requested epochs, the optimized state of the nearest node of the named variable.
    pub fn extract_solution(
        &self,
        name: &str,
        times: &[Epoch],
    ) -> Result<Trajectory, EstimationError> {
        let (layout, solution) = self.solved_layout(name)?;
        let mut states = Vec::with_capacity(times.len());
        for epoch in times {
            let step = nearest_index(&self.nodes, *epoch).ok_or(EstimationError::UnboundResidual {
                epoch: *epoch,
            })?;
            states.push(layout.state(solution, step));
        }
        Ok(Trajectory::new(times.to_vec(), states)?.with_name(name))
    }

    /// Returns the optimized state of each node of the named variable.
    pub fn extract_nodes(&self, name: &str) -> Result<Trajectory, EstimationError> {
        let (layout, solution) = self.solved_layout(name)?;
        let states = (0..layout.steps)
            .map(|step| layout.state(solution, step))
            .collect();
        Ok(Trajectory::new(self.nodes.clone(), states)?.with_name(name))
    }
}

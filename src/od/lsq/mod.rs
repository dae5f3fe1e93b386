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

use crate::errors::{
    DimensionMismatchSnafu, EstimationError, InvalidWeightSnafu, NoConvergenceSnafu,
    RankDeficientSnafu,
};
use crate::io::{maybe_duration_from_str, maybe_duration_to_str, ConfigRepr};
use crate::linalg::{DMatrix, DVector, Vector3};
use crate::md::trajectory::Trajectory;
use crate::models::{MeasurementModel, Pseudorange, PseudorangeParams};
use crate::time::{Duration, Epoch};
use crate::utils::ensure_monotonic;
use serde_derive::{Deserialize, Serialize};
use snafu::ensure;
use std::time::Instant;
use typed_builder::TypedBuilder;

mod solution;
pub use solution::{BatchLsqSolution, LsqSolution};

/// Solver choice for the iterative least squares estimator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LsqSolver {
    /// Gauss-Newton with the normal equations: (J^T W J) dx = J^T W dy
    #[default]
    NormalEquations,
    /// Levenberg-Marquardt: (J^T W J + lambda * D^T D) dx = J^T W dy
    LevenbergMarquardt,
}

/// A range observation to a known reference point, e.g. a pseudorange to a satellite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeObservation {
    pub reference: Vector3<f64>,
    pub range: f64,
    /// One sigma noise of the range
    pub sigma: f64,
}

impl RangeObservation {
    pub fn new(reference: Vector3<f64>, range: f64, sigma: f64) -> Self {
        Self {
            reference,
            range,
            sigma,
        }
    }
}

/// A range observation at a given epoch, used in the batch fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedRangeObservation {
    pub epoch: Epoch,
    pub obs: RangeObservation,
}

fn default_tolerance() -> f64 {
    1e-6
}
fn default_max_iterations() -> usize {
    20
}
fn default_lambda_init() -> f64 {
    1e-2
}
fn default_lambda_factor() -> f64 {
    10.0
}
fn default_lambda_min() -> f64 {
    1e-12
}
fn default_lambda_max() -> f64 {
    1e12
}
fn default_true() -> bool {
    true
}
fn default_rank_tolerance() -> f64 {
    1e-10
}

/// Configuration of the iterative (Gauss-Newton or Levenberg-Marquardt) least squares estimator of a position and
/// a clock bias from range observations.
#[derive(Clone, Debug, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct IterativeLeastSquares {
    /// Solver method
    #[builder(default)]
    #[serde(default)]
    pub solver: LsqSolver,
    /// Convergence tolerance on the norm of the correction (dx)
    #[builder(default = default_tolerance())]
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Maximum number of iterations
    #[builder(default = default_max_iterations())]
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Initial damping factor for Levenberg-Marquardt
    #[builder(default = default_lambda_init())]
    #[serde(default = "default_lambda_init")]
    pub lm_lambda_init: f64,
    /// Factor to decrease lambda by in LM
    #[builder(default = default_lambda_factor())]
    #[serde(default = "default_lambda_factor")]
    pub lm_lambda_decrease: f64,
    /// Factor to increase lambda by in LM
    #[builder(default = default_lambda_factor())]
    #[serde(default = "default_lambda_factor")]
    pub lm_lambda_increase: f64,
    /// Minimum value for LM lambda
    #[builder(default = default_lambda_min())]
    #[serde(default = "default_lambda_min")]
    pub lm_lambda_min: f64,
    /// Maximum value for LM lambda
    #[builder(default = default_lambda_max())]
    #[serde(default = "default_lambda_max")]
    pub lm_lambda_max: f64,
    /// Use diagonal scaling (D = sqrt(diag(J^T W J))) in LM
    #[builder(default = default_true())]
    #[serde(default = "default_true")]
    pub lm_use_diag_scaling: bool,
    /// Singular values of the weighted jacobian below this fraction of the largest one are considered null
    #[builder(default = default_rank_tolerance())]
    #[serde(default = "default_rank_tolerance")]
    pub rank_tolerance: f64,
    /// Wall clock budget of one solve
    #[builder(default)]
    #[serde(
        default,
        serialize_with = "maybe_duration_to_str",
        deserialize_with = "maybe_duration_from_str"
    )]
    pub max_duration: Option<Duration>,
}

impl Default for IterativeLeastSquares {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConfigRepr for IterativeLeastSquares {}

/// A least squares problem: the residuals and the jacobian of the computed observations with respect to the unknowns.
trait RangeFit {
    fn unknowns(&self) -> usize;

    fn sigmas(&self) -> DVector<f64>;

    /// Returns the prefit residuals (real minus computed) and the jacobian of the computed observations.
    fn evaluate(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>), EstimationError>;
}

/// Computed pseudorange of an observation and its sensitivity over the `[x, y, z, b, ḃ]` receiver state.
fn observe(
    state: &DVector<f64>,
    obs: &RangeObservation,
) -> Result<(f64, DMatrix<f64>), EstimationError> {
    let lin = Pseudorange.linearize(
        state,
        &PseudorangeParams {
            sat_pos: obs.reference,
        },
    )?;
    Ok((lin.computed_obs[0], lin.sensitivity))
}

struct EpochFit<'a> {
    obs: Vec<&'a RangeObservation>,
}

impl RangeFit for EpochFit<'_> {
    fn unknowns(&self) -> usize {
        4
    }

    fn sigmas(&self) -> DVector<f64> {
        DVector::from_iterator(self.obs.len(), self.obs.iter().map(|o| o.sigma))
    }

    fn evaluate(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>), EstimationError> {
        // No bias drift within a single epoch
        let state = DVector::from_vec(vec![x[0], x[1], x[2], x[3], 0.0]);
        let mut resid = DVector::zeros(self.obs.len());
        let mut jac = DMatrix::zeros(self.obs.len(), 4);
        for (i, obs) in self.obs.iter().enumerate() {
            let (computed, h_tilde) = observe(&state, obs)?;
            resid[i] = obs.range - computed;
            jac.row_mut(i).copy_from(&h_tilde.columns(0, 4));
        }
        Ok((resid, jac))
    }
}

struct BatchFit<'a> {
    reference_epoch: Epoch,
    obs: Vec<&'a TimedRangeObservation>,
}

impl RangeFit for BatchFit<'_> {
    fn unknowns(&self) -> usize {
        5
    }

    fn sigmas(&self) -> DVector<f64> {
        DVector::from_iterator(self.obs.len(), self.obs.iter().map(|o| o.obs.sigma))
    }

    fn evaluate(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>), EstimationError> {
        let mut resid = DVector::zeros(self.obs.len());
        let mut jac = DMatrix::zeros(self.obs.len(), 5);
        for (i, timed) in self.obs.iter().enumerate() {
            let dt = (timed.epoch - self.reference_epoch).to_seconds();
            // Receiver state at the epoch of the observation: b(t) = b0 + α (t - t_ref)
            let state = DVector::from_vec(vec![x[0], x[1], x[2], x[3] + x[4] * dt, x[4]]);
            let (computed, h_tilde) = observe(&state, &timed.obs)?;
            resid[i] = timed.obs.range - computed;
            jac.fixed_view_mut::<1, 4>(i, 0)
                .copy_from(&h_tilde.fixed_view::<1, 4>(0, 0));
            jac[(i, 4)] = h_tilde[(0, 3)] * dt + h_tilde[(0, 4)];
        }
        Ok((resid, jac))
    }
}

/// Output of the iterations, shared by the single epoch and the batch fits.
struct FitOutput {
    estimate: DVector<f64>,
    covariance: DMatrix<f64>,
    num_iterations: usize,
    final_rms: f64,
    final_step_norm: f64,
    num_obs: usize,
}

/// Weighted residuals and jacobian, where each row is divided by its sigma.
fn weighted(
    fit: &impl RangeFit,
    sigmas: &DVector<f64>,
    x: &DVector<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>, f64), EstimationError> {
    let (resid, mut jac) = fit.evaluate(x)?;
    let rms = (resid.norm_squared() / resid.len() as f64).sqrt();
    let resid = resid.component_div(sigmas);
    for (mut row, sigma) in jac.row_iter_mut().zip(sigmas.iter()) {
        row /= *sigma;
    }
    Ok((resid, jac, rms))
}

impl IterativeLeastSquares {
    fn check_obs(&self, obs: &RangeObservation) -> Result<bool, EstimationError> {
        ensure!(
            obs.sigma.is_finite() && obs.sigma > 0.0,
            InvalidWeightSnafu {
                what: "range observation sigma"
            }
        );
        // Unavailable observations are skipped
        Ok(obs.range.is_finite() && obs.reference.iter().all(|v| v.is_finite()))
    }

    /// Estimates the position and the clock bias `[x, y, z, b]` from the range observations of a single epoch.
    pub fn solve_epoch(
        &self,
        observations: &[RangeObservation],
        initial_guess: &DVector<f64>,
    ) -> Result<LsqSolution, EstimationError> {
        let mut obs = Vec::with_capacity(observations.len());
        for o in observations {
            if self.check_obs(o)? {
                obs.push(o);
            }
        }
        let out = self.iterate(&EpochFit { obs }, initial_guess)?;
        Ok(LsqSolution {
            estimate: out.estimate,
            covariance: out.covariance,
            num_iterations: out.num_iterations,
            final_rms: out.final_rms,
            final_step_norm: out.final_step_norm,
            num_obs: out.num_obs,
        })
    }

    /// Estimates the position, the clock bias at the reference epoch and the clock bias drift `[x, y, z, b0, α]`
    /// from range observations spread over several epochs, assuming a static position.
    pub fn solve_batch(
        &self,
        reference_epoch: Epoch,
        observations: &[TimedRangeObservation],
        initial_guess: &DVector<f64>,
    ) -> Result<BatchLsqSolution, EstimationError> {
        let mut obs = Vec::with_capacity(observations.len());
        for o in observations {
            if self.check_obs(&o.obs)? {
                obs.push(o);
            }
        }
        let out = self.iterate(
            &BatchFit {
                reference_epoch,
                obs,
            },
            initial_guess,
        )?;
        Ok(BatchLsqSolution {
            reference_epoch,
            estimate: out.estimate,
            covariance: out.covariance,
            num_iterations: out.num_iterations,
            final_rms: out.final_rms,
            final_step_norm: out.final_step_norm,
            num_obs: out.num_obs,
        })
    }

    /// Solves each epoch independently, each one initialized from the previous solution, and returns the
    /// trajectory of the `[x, y, z, b]` solutions.
    ///
    /// Epochs which cannot be solved (too few observations or no convergence) are skipped with a warning.
    pub fn solve_epochs(
        &self,
        observations: &[(Epoch, Vec<RangeObservation>)],
        initial_guess: &DVector<f64>,
    ) -> Result<Trajectory, EstimationError> {
        let epochs: Vec<Epoch> = observations.iter().map(|(epoch, _)| *epoch).collect();
        ensure_monotonic(&epochs)?;

        let mut guess = initial_guess.clone();
        let mut solved_epochs = Vec::with_capacity(epochs.len());
        let mut states = Vec::with_capacity(epochs.len());
        for (epoch, obs) in observations {
            match self.solve_epoch(obs, &guess) {
                Ok(sol) => {
                    debug!("@ {epoch}: {} obs, RMS {:.3}", sol.num_obs, sol.final_rms);
                    guess = sol.estimate.clone();
                    solved_epochs.push(*epoch);
                    states.push(sol.estimate);
                }
                Err(e @ EstimationError::RankDeficient { .. })
                | Err(e @ EstimationError::NoConvergence { .. }) => {
                    warn!("skipping {epoch}: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "solved {} of {} epochs",
            solved_epochs.len(),
            observations.len()
        );
        Ok(Trajectory::new(solved_epochs, states)?.with_name("LSQ"))
    }

    fn iterate(
        &self,
        fit: &impl RangeFit,
        initial_guess: &DVector<f64>,
    ) -> Result<FitOutput, EstimationError> {
        let unknowns = fit.unknowns();
        ensure!(
            initial_guess.len() == unknowns,
            DimensionMismatchSnafu {
                action: "least squares initial guess",
                expected: unknowns,
                got: initial_guess.len()
            }
        );
        let sigmas = fit.sigmas();
        let num_obs = sigmas.len();
        ensure!(
            num_obs >= unknowns,
            RankDeficientSnafu {
                rank: num_obs,
                unknowns
            }
        );

        debug!("Starting least squares with {num_obs} observations for {unknowns} unknowns");

        let start = Instant::now();
        let mut estimate = initial_guess.clone();
        let (mut resid, mut jac, mut rms) = weighted(fit, &sigmas, &estimate)?;
        let mut lambda = self.lm_lambda_init;
        let mut step_norm = f64::INFINITY;

        for iter in 1..=self.max_iterations {
            if let Some(budget) = self.max_duration {
                if start.elapsed().as_secs_f64() >= budget.to_seconds() {
                    return NoConvergenceSnafu {
                        iterations: iter - 1,
                        reason: format!("time budget of {budget} exhausted"),
                    }
                    .fail();
                }
            }

            self.check_rank(&jac)?;

            // Information Matrix: Lambda = J^T * W * J
            let info_matrix = jac.transpose() * &jac;
            // Normal Matrix: N = J^T * W * dy
            let normal_matrix = jac.transpose() * &resid;

            let correction = match self.solver {
                LsqSolver::NormalEquations => {
                    let chol = info_matrix
                        .cholesky()
                        .ok_or(EstimationError::RankDeficient {
                            rank: unknowns - 1,
                            unknowns,
                        })?;
                    let correction = chol.solve(&normal_matrix);
                    estimate += &correction;
                    (resid, jac, rms) = weighted(fit, &sigmas, &estimate)?;
                    correction
                }
                LsqSolver::LevenbergMarquardt => {
                    let gauss_newton = info_matrix
                        .clone()
                        .cholesky()
                        .ok_or(EstimationError::RankDeficient {
                            rank: unknowns - 1,
                            unknowns,
                        })?
                        .solve(&normal_matrix);
                    if gauss_newton.norm() < self.tolerance {
                        // Already at the minimum: the undamped step is below the tolerance
                        estimate += &gauss_newton;
                        (resid, jac, rms) = weighted(fit, &sigmas, &estimate)?;
                        gauss_newton
                    } else {
                        let cost = resid.norm_squared();
                        let mut d_sq = DMatrix::<f64>::identity(unknowns, unknowns);
                        if self.lm_use_diag_scaling {
                            for i in 0..unknowns {
                                d_sq[(i, i)] = info_matrix[(i, i)].max(1e-6);
                            }
                        }
                        // Increase the damping until the cost decreases
                        loop {
                            let augmented = &info_matrix + &d_sq * lambda;
                            let trial_correction =
                                augmented.cholesky().map(|c| c.solve(&normal_matrix));
                            if let Some(correction) = trial_correction {
                                let trial = &estimate + &correction;
                                let (trial_resid, trial_jac, trial_rms) =
                                    weighted(fit, &sigmas, &trial)?;
                                if trial_resid.norm_squared() <= cost {
                                    lambda =
                                        (lambda / self.lm_lambda_decrease).max(self.lm_lambda_min);
                                    debug!("LM: cost decreased, lambda now {lambda:.3e}");
                                    estimate = trial;
                                    (resid, jac, rms) = (trial_resid, trial_jac, trial_rms);
                                    break correction;
                                }
                            }
                            if lambda >= self.lm_lambda_max {
                                warn!("LM: no step decreases the cost with lambda = {lambda:.3e}");
                                return NoConvergenceSnafu {
                                    iterations: iter,
                                    reason: format!(
                                        "LM damping exhausted at lambda {lambda:.3e}, RMS {rms:.6}"
                                    ),
                                }
                                .fail();
                            }
                            lambda = (lambda * self.lm_lambda_increase).min(self.lm_lambda_max);
                            debug!("LM: cost increased, lambda now {lambda:.3e}");
                        }
                    }
                }
            };

            step_norm = correction.norm();
            debug!(
                "[{iter}/{}] RMS: {rms:.6}; correction: {step_norm:.3e}",
                self.max_iterations
            );

            if step_norm < self.tolerance {
                info!("Converged in {iter} iterations, final RMS {rms:.6}");
                self.check_rank(&jac)?;
                let covariance = (jac.transpose() * &jac)
                    .cholesky()
                    .ok_or(EstimationError::RankDeficient {
                        rank: unknowns - 1,
                        unknowns,
                    })?
                    .inverse();
                return Ok(FitOutput {
                    estimate,
                    covariance,
                    num_iterations: iter,
                    final_rms: rms,
                    final_step_norm: step_norm,
                    num_obs,
                });
            }
        }

        warn!(
            "Maximum iterations ({}) reached without convergence. Last correction norm: {:.3e}",
            self.max_iterations, step_norm
        );
        NoConvergenceSnafu {
            iterations: self.max_iterations,
            reason: format!(
                "last correction norm {step_norm:.3e} above tolerance {:.3e}",
                self.tolerance
            ),
        }
        .fail()
    }

    /// Checks the numerical rank of the weighted jacobian from its singular values.
    fn check_rank(&self, jac: &DMatrix<f64>) -> Result<(), EstimationError> {
        let unknowns = jac.ncols();
        let singular_values = jac.clone().svd(false, false).singular_values;
        let largest = singular_values.max();
        let rank = if largest > 0.0 && largest.is_finite() {
            singular_values
                .iter()
                .filter(|sv| **sv > self.rank_tolerance * largest)
                .count()
        } else {
            0
        };
        ensure!(rank == unknowns, RankDeficientSnafu { rank, unknowns });
        Ok(())
    }
}

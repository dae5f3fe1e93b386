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

use crate::errors::{DimensionMismatchSnafu, EstimationError};
use crate::linalg::{DMatrix, DVector};
use crate::time::Epoch;
use crate::utils::{ensure_monotonic, nearest_index};
use snafu::ensure;
use std::fmt;

/// Store a trajectory estimate: a time grid and the state estimated at each of its epochs.
///
/// A trajectory returned by an estimator is never modified afterward: the accessors only borrow.
#[derive(Clone, PartialEq)]
pub struct Trajectory {
    /// Optionally name this trajectory
    pub name: Option<String>,
    epochs: Vec<Epoch>,
    states: Vec<DVector<f64>>,
}

impl Trajectory {
    /// Builds a new trajectory, checking that the epochs are sorted and that all states have the same dimension.
    pub fn new(epochs: Vec<Epoch>, states: Vec<DVector<f64>>) -> Result<Self, EstimationError> {
        ensure!(
            epochs.len() == states.len(),
            DimensionMismatchSnafu {
                action: "trajectory states",
                expected: epochs.len(),
                got: states.len()
            }
        );
        ensure_monotonic(&epochs)?;
        if let Some(first) = states.first() {
            for state in &states {
                ensure!(
                    state.len() == first.len(),
                    DimensionMismatchSnafu {
                        action: "trajectory state dimension",
                        expected: first.len(),
                        got: state.len()
                    }
                );
            }
        }
        Ok(Self {
            name: None,
            epochs,
            states,
        })
    }

    /// Sets the name of this trajectory
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sorts the states by epoch and removes the duplicated epochs, keeping the first occurrence.
    pub(crate) fn finalize(&mut self) {
        let mut pairs: Vec<(Epoch, DVector<f64>)> = self
            .epochs
            .drain(..)
            .zip(self.states.drain(..))
            .collect();
        // Stable sort: on duplicated epochs, the first one stays first
        pairs.sort_by_key(|(epoch, _)| *epoch);
        pairs.dedup_by(|a, b| a.0 == b.0);
        let (epochs, states) = pairs.into_iter().unzip();
        self.epochs = epochs;
        self.states = states;
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Dimension of the states of this trajectory, zero if empty
    pub fn dim(&self) -> usize {
        self.states.first().map_or(0, |s| s.len())
    }

    /// Returns the first epoch and state of the trajectory
    pub fn first(&self) -> Option<(Epoch, &DVector<f64>)> {
        Some((*self.epochs.first()?, self.states.first()?))
    }

    /// Returns the last epoch and state of the trajectory
    pub fn last(&self) -> Option<(Epoch, &DVector<f64>)> {
        Some((*self.epochs.last()?, self.states.last()?))
    }

    /// Returns the state stored exactly at the provided epoch, if any.
    pub fn at(&self, epoch: Epoch) -> Option<&DVector<f64>> {
        self.epochs
            .binary_search(&epoch)
            .ok()
            .map(|idx| &self.states[idx])
    }

    /// Returns the state whose epoch is the closest to the provided epoch (the earlier one on ties).
    pub fn nearest(&self, epoch: Epoch) -> Option<&DVector<f64>> {
        nearest_index(&self.epochs, epoch).map(|idx| &self.states[idx])
    }

    /// Returns the time history of one component of the state.
    pub fn component(&self, index: usize) -> Result<DVector<f64>, EstimationError> {
        ensure!(
            self.is_empty() || index < self.dim(),
            DimensionMismatchSnafu {
                action: "trajectory component",
                expected: self.dim(),
                got: index
            }
        );
        Ok(DVector::from_iterator(
            self.len(),
            self.states.iter().map(|s| s[index]),
        ))
    }

    /// Merges two trajectories of the same dimension. If they do not overlap, a warning is printed.
    ///
    /// On duplicated epochs, the state of `self` is kept.
    pub fn merge(&self, other: &Self) -> Result<Self, EstimationError> {
        if !self.is_empty() && !other.is_empty() {
            ensure!(
                self.dim() == other.dim(),
                DimensionMismatchSnafu {
                    action: "merged trajectory dimension",
                    expected: self.dim(),
                    got: other.dim()
                }
            );
        }

        let (first, second) = match (self.first(), other.first()) {
            (Some((mine, _)), Some((theirs, _))) if theirs < mine => (other, self),
            _ => (self, other),
        };
        if let (Some((first_end, _)), Some((second_start, _))) = (first.last(), second.first()) {
            if first_end < second_start {
                warn!(
                    "Resulting merged trajectory will have a time-gap of {} starting at {}",
                    second_start - first_end,
                    first_end
                );
            }
        }

        let mut me = self.clone();
        me.epochs.extend_from_slice(&other.epochs);
        me.states.extend(other.states.iter().cloned());
        me.finalize();
        Ok(me)
    }

    /// Returns the trajectory as a matrix with one row per epoch and one column per state component.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.len(), self.dim(), |row, col| self.states[row][col])
    }

    /// Root mean square of the norm of the difference between each state and the nearest state of the other trajectory.
    pub fn rms_error(&self, truth: &Self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut sum_sq = 0.0;
        for (epoch, state) in self.epochs.iter().zip(&self.states) {
            let other = truth.nearest(*epoch)?;
            if other.len() != state.len() {
                return None;
            }
            sum_sq += (state - other).norm_squared();
        }
        Some((sum_sq / self.len() as f64).sqrt())
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("Trajectory");
        match (self.first(), self.last()) {
            (Some((start, _)), Some((end, _))) => {
                let dur = end - start;
                write!(
                    f,
                    "{} from {} to {} ({}, or {:.3} s) [{} states]",
                    name,
                    start,
                    end,
                    dur,
                    dur.to_seconds(),
                    self.len()
                )
            }
            _ => write!(f, "{name} [empty]"),
        }
    }
}

impl fmt::Debug for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}",)
    }
}

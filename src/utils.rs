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
    DimensionMismatchSnafu, EstimationError, InvalidWeightSnafu, NonMonotonicTimeSnafu,
};
use crate::linalg::{DMatrix, DVector};
use crate::time::Epoch;
use nalgebra::linalg::SymmetricEigen;
use snafu::ensure;

/// Relative tolerance used to decide whether a matrix is symmetric.
pub const SYMMETRY_TOL: f64 = 1e-9;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ), which removes the round-off asymmetry of covariance updates.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Returns whether the provided square matrix is symmetric, relative to its largest absolute entry.
pub fn is_symmetric(m: &DMatrix<f64>) -> bool {
    if !m.is_square() {
        return false;
    }
    let scale = m.amax().max(1.0);
    (m - m.transpose()).amax() <= SYMMETRY_TOL * scale
}

/// Floors the eigenvalues of a symmetric matrix at zero, returning the closest positive semi definite matrix.
pub fn clip_psd(m: &DMatrix<f64>) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(symmetrize(m));
    if eigen.eigenvalues.iter().all(|l| *l >= 0.0) {
        return symmetrize(m);
    }
    let clipped = eigen.eigenvalues.map(|l| l.max(0.0));
    let u = eigen.eigenvectors;
    symmetrize(&(&u * DMatrix::from_diagonal(&clipped) * u.transpose()))
}

/// Returns the square root of an information (weight) matrix, i.e. the upper triangular `U = Lᵀ`
/// where `W = L Lᵀ`, such that `eᵀ W e = ‖U e‖²`.
///
/// Fails if the weight is not square, not of the expected dimension, not symmetric or not positive definite.
pub fn sqrt_information(
    weight: &DMatrix<f64>,
    dim: usize,
    what: &'static str,
) -> Result<DMatrix<f64>, EstimationError> {
    ensure!(
        weight.nrows() == dim,
        DimensionMismatchSnafu {
            action: what,
            expected: dim,
            got: weight.nrows()
        }
    );
    ensure!(
        weight.ncols() == dim,
        DimensionMismatchSnafu {
            action: what,
            expected: dim,
            got: weight.ncols()
        }
    );
    ensure!(is_symmetric(weight), InvalidWeightSnafu { what });

    match symmetrize(weight).cholesky() {
        Some(chol) => Ok(chol.l().transpose()),
        None => InvalidWeightSnafu { what }.fail(),
    }
}

/// Keeps only the entries of `v` flagged in `mask`.
pub fn mask_vector(v: &DVector<f64>, mask: &[bool]) -> DVector<f64> {
    DVector::from_iterator(
        mask.iter().filter(|m| **m).count(),
        v.iter().zip(mask).filter(|(_, m)| **m).map(|(x, _)| *x),
    )
}

/// Keeps only the rows of `m` flagged in `mask`.
pub fn mask_rows(m: &DMatrix<f64>, mask: &[bool]) -> DMatrix<f64> {
    let kept: Vec<usize> = (0..m.nrows()).filter(|i| mask[*i]).collect();
    m.select_rows(kept.iter())
}

/// Keeps only the rows and columns of the square matrix `m` flagged in `mask`.
pub fn mask_square(m: &DMatrix<f64>, mask: &[bool]) -> DMatrix<f64> {
    let kept: Vec<usize> = (0..m.nrows()).filter(|i| mask[*i]).collect();
    m.select_rows(kept.iter()).select_columns(kept.iter())
}

/// Ensures that the provided epochs are sorted in non-decreasing order.
pub fn ensure_monotonic(epochs: &[Epoch]) -> Result<(), EstimationError> {
    for pair in epochs.windows(2) {
        ensure!(
            pair[1] >= pair[0],
            NonMonotonicTimeSnafu {
                prev: pair[0],
                next: pair[1]
            }
        );
    }
    Ok(())
}

/// Returns the index of the epoch of the (sorted) grid closest to `epoch`, preferring the earlier one on ties.
pub fn nearest_index(grid: &[Epoch], epoch: Epoch) -> Option<usize> {
    if grid.is_empty() {
        return None;
    }
    match grid.binary_search(&epoch) {
        Ok(idx) => Some(idx),
        Err(0) => Some(0),
        Err(idx) if idx >= grid.len() => Some(grid.len() - 1),
        Err(idx) => {
            let before = (epoch - grid[idx - 1]).abs();
            let after = (grid[idx] - epoch).abs();
            if after < before {
                Some(idx)
            } else {
                Some(idx - 1)
            }
        }
    }
}

/// Root mean square of the norms of the differences between two sequences of states.
pub fn rss_errors(estimated: &[DVector<f64>], truth: &[DVector<f64>]) -> f64 {
    let count = estimated.len().min(truth.len());
    if count == 0 {
        return 0.0;
    }
    let sum_sq: f64 = estimated
        .iter()
        .zip(truth)
        .map(|(est, tru)| (est - tru).norm_squared())
        .sum();
    (sum_sq / count as f64).sqrt()
}

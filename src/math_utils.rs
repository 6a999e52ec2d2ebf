//! Generalized inverses and null-space projectors for task-priority IK.
//!
//! All functions are pure and never fail: a rank-deficient or even zero
//! matrix yields a finite result, with singular directions contributing
//! nothing instead of blowing the solution up.

extern crate nalgebra as na;

use na::linalg::SVD;
use na::{DMatrix, DVector};

/// Computes the damped pseudo-inverse of a possibly rank-deficient matrix.
///
/// Singular values at or above `eps` are inverted exactly, so well
/// conditioned matrices get the plain Moore-Penrose inverse. Below `eps`
/// the inversion is regularized with a damping term that grows
/// continuously as the singular value approaches zero:
///
/// `s / (s^2 + lambda^2)` with `lambda^2 = (1 - (s/eps)^2) * lambda_max^2`
///
/// A singular value of exactly zero therefore contributes nothing, and the
/// gain near a singularity never exceeds `1 / (2 * lambda_max)`.
pub fn damped_pseudo_inverse(matrix: &DMatrix<f64>, eps: f64, lambda_max: f64) -> DMatrix<f64> {
    let svd = SVD::new(matrix.clone(), true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return DMatrix::zeros(matrix.ncols(), matrix.nrows());
    };
    let inverted = svd.singular_values.map(|s| {
        if s >= eps {
            1.0 / s
        } else if s <= 0.0 {
            0.0
        } else {
            let ratio = s / eps;
            let lambda_sq = (1.0 - ratio * ratio) * lambda_max * lambda_max;
            s / (s * s + lambda_sq)
        }
    });
    v_t.transpose() * DMatrix::from_diagonal(&inverted) * u.transpose()
}

/// Computes the truncated pseudo-inverse: singular values below `eps` are
/// zeroed outright. Returns the inverse together with the numerical rank.
///
/// The hard cutoff keeps `pinv(J) * J` an exact orthogonal projector, which
/// the priority recursion relies on; within-task solves use the damped
/// variant instead.
pub fn pseudo_inverse(matrix: &DMatrix<f64>, eps: f64) -> (DMatrix<f64>, usize) {
    let svd = SVD::new(matrix.clone(), true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return (DMatrix::zeros(matrix.ncols(), matrix.nrows()), 0);
    };
    let mut rank = 0;
    let inverted = svd.singular_values.map(|s| {
        if s > eps {
            1.0 / s
        } else {
            0.0
        }
    });
    for s in svd.singular_values.iter() {
        if *s > eps {
            rank += 1;
        }
    }
    (v_t.transpose() * DMatrix::from_diagonal(&inverted) * u.transpose(), rank)
}

/// Numerical rank: the number of singular values above `eps`.
pub fn rank(matrix: &DMatrix<f64>, eps: f64) -> usize {
    let svd = SVD::new(matrix.clone(), false, false);
    svd.singular_values.iter().filter(|s| **s > eps).count()
}

/// Returns `I - pinv(J) * J`, the orthogonal projector onto the null space
/// of `jacobian`: the joint-velocity directions that do not affect the
/// task output at all.
pub fn null_space_projector(jacobian: &DMatrix<f64>, eps: f64) -> DMatrix<f64> {
    let n = jacobian.ncols();
    let (pinv, _) = pseudo_inverse(jacobian, eps);
    DMatrix::identity(n, n) - pinv * jacobian
}

/// Checks that every entry of the vector is finite.
pub(crate) fn is_finite_vector(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Checks that every entry of the matrix is finite.
pub(crate) fn is_finite_matrix(m: &DMatrix<f64>) -> bool {
    m.iter().all(|x| x.is_finite())
}

//! Small dense linear-algebra helpers bridging `ndarray` and `nalgebra`.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Eigenvalues at or below this fraction of the largest eigenvalue are treated as zero.
pub const EIGEN_REL_TOL: f64 = 1e-12;

pub fn to_dmatrix(matrix: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = matrix.dim();
    DMatrix::from_fn(rows, cols, |i, j| matrix[[i, j]])
}

pub fn from_dmatrix(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// Pseudo-inverse of a symmetric matrix restricted to its positive eigen-directions.
///
/// The result is symmetric positive semidefinite. Also returns the number of dropped
/// directions (non-positive or negligible eigenvalues).
pub fn psd_pseudo_inverse(matrix: &Array2<f64>) -> (Array2<f64>, usize) {
    let n = matrix.nrows();
    let eigen = to_dmatrix(matrix).symmetric_eigen();
    let max_eig = eigen.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    let tol = EIGEN_REL_TOL * max_eig;

    let mut inverse = Array2::zeros((n, n));
    let mut dropped = 0;
    for (k, &lambda) in eigen.eigenvalues.iter().enumerate() {
        if lambda <= tol || lambda <= 0.0 {
            dropped += 1;
            continue;
        }
        for i in 0..n {
            for j in 0..n {
                inverse[[i, j]] += eigen.eigenvectors[(i, k)] * eigen.eigenvectors[(j, k)] / lambda;
            }
        }
    }
    (inverse, dropped)
}

/// Lower-triangular Cholesky factor, `None` if the matrix is not positive definite.
pub fn cholesky(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    to_dmatrix(matrix)
        .cholesky()
        .map(|c| from_dmatrix(&c.l()))
}

/// Factor `L` with `L Lᵀ = matrix` for a symmetric positive semidefinite matrix.
///
/// Uses Cholesky when possible and the eigen square root `Q √Λ` otherwise, with negative
/// eigenvalues clipped to zero.
pub fn psd_factor(matrix: &Array2<f64>) -> Array2<f64> {
    if let Some(l) = cholesky(matrix) {
        return l;
    }
    let n = matrix.nrows();
    let eigen = to_dmatrix(matrix).symmetric_eigen();
    Array2::from_shape_fn((n, n), |(i, k)| {
        eigen.eigenvectors[(i, k)] * eigen.eigenvalues[k].max(0.0).sqrt()
    })
}

/// Log determinant of a positive definite matrix.
pub fn ln_det_pd(matrix: &Array2<f64>) -> Option<f64> {
    cholesky(matrix).map(|l| 2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>())
}

/// Quadratic form `vᵀ A⁻¹ v` given the Cholesky factor `L` of `A`, `NaN` if `L` is singular.
pub fn inv_quad_form(l: &Array2<f64>, v: &Array1<f64>) -> f64 {
    // L y = v, the form is |y|².
    to_dmatrix(l)
        .solve_lower_triangular(&DVector::from_iterator(v.len(), v.iter().copied()))
        .map_or(f64::NAN, |y| y.norm_squared())
}

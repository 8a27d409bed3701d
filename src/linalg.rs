//! Dense solves and eigendecompositions on `ndarray` data via `nalgebra`.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{GsError, Result};

pub(crate) fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Solves `a · x = b` by LU decomposition with partial pivoting.
pub(crate) fn solve(a: ArrayView2<f64>, b: ArrayView1<f64>, context: &str) -> Result<Array1<f64>> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(GsError::Numerical(format!(
            "{}: cannot solve a {}x{} system against a vector of length {}",
            context,
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }
    let rhs = DVector::from_iterator(b.len(), b.iter().copied());
    let solution = to_dmatrix(a)
        .lu()
        .solve(&rhs)
        .ok_or_else(|| GsError::Numerical(format!("{}: matrix is singular", context)))?;
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(GsError::Numerical(format!(
            "{}: solution contains non-finite values",
            context
        )));
    }
    Ok(Array1::from_iter(solution.iter().copied()))
}

/// Eigenvalues and column eigenvectors of a symmetric matrix.
pub(crate) fn symmetric_eigen(a: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let eig = to_dmatrix(a).symmetric_eigen();
    let n = eig.eigenvalues.len();
    let values = Array1::from_iter(eig.eigenvalues.iter().copied());
    let vectors = Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, j)]);
    (values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn solves_small_system() {
        let a = array![[4.0, 1.0], [2.0, 3.0]];
        let x = solve(a.view(), array![1.0, 2.0].view(), "test").unwrap();
        assert_relative_eq!(x[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn singular_system_is_numerical_error() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let err = solve(a.view(), array![1.0, 1.0].view(), "test").unwrap_err();
        assert!(matches!(err, GsError::Numerical(_)));
    }

    #[test]
    fn eigen_reconstructs_matrix() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(a.view());
        let rebuilt = vectors.dot(&Array2::from_diag(&values)).dot(&vectors.t());
        for (r, e) in rebuilt.iter().zip(a.iter()) {
            assert_relative_eq!(r, e, epsilon = 1e-10);
        }
    }
}

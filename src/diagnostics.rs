// src/diagnostics.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Computes the Frobenius norm of a matrix.
pub fn frob_norm(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Frobenius norm of the element-wise absolute value of `matrix`. This is the
/// total used to normalize explained variance.
pub fn abs_frob_norm(matrix: &ArrayView2<f64>) -> f64 {
    frob_norm(&matrix.mapv(f64::abs).view())
}

/// Fraction of the total squared norm carried by each singular value,
/// `d_i^2 / total_norm^2`. A zero total yields zeros.
pub fn explained_variance(singular_values: &ArrayView1<f64>, total_norm: f64) -> Array1<f64> {
    let total = total_norm * total_norm;
    if total <= 0.0 {
        return Array1::zeros(singular_values.len());
    }
    singular_values.mapv(|d| d * d / total)
}

/// Computes orthogonality error ||I - Q^T Q||_F.
pub fn orthogonality_error(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let identity = Array2::<f64>::eye(qtq.nrows());
    let diff = identity - qtq;
    Some(frob_norm(&diff.view()))
}

/// Computes ||A - U diag(d) V^T||_F / ||A||_F with `v` stored column-wise
/// (C x k), the layout used by [`crate::decomposition::Decomposition`].
pub fn reconstruction_error(
    original_matrix: &ArrayView2<f64>,
    u: &ArrayView2<f64>,
    d: &ArrayView1<f64>,
    v: &ArrayView2<f64>,
) -> Option<f64> {
    if original_matrix.is_empty() {
        return None;
    }
    if u.ncols() != d.len() || d.len() != v.ncols() {
        return None;
    }
    if u.nrows() != original_matrix.nrows() || v.nrows() != original_matrix.ncols() {
        return None;
    }

    let reconstructed = u.dot(&Array2::from_diag(d)).dot(&v.t());
    let diff = original_matrix - &reconstructed;

    let norm_diff = frob_norm(&diff.view());
    let norm_original = frob_norm(original_matrix);

    if norm_original < 1e-12 {
        if norm_diff < 1e-12 {
            Some(0.0)
        } else {
            Some(f64::INFINITY)
        }
    } else {
        Some(norm_diff / norm_original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn frob_norms() {
        let m = array![[3.0, -4.0], [0.0, 0.0]];
        assert_abs_diff_eq!(frob_norm(&m.view()), 5.0);
        assert_abs_diff_eq!(abs_frob_norm(&m.view()), 5.0);
        assert_eq!(frob_norm(&Array2::<f64>::zeros((0, 2)).view()), 0.0);
    }

    #[test]
    fn explained_variance_sums_to_one_for_full_spectrum() {
        let d = array![4.0, 3.0];
        let r2 = explained_variance(&d.view(), 5.0);
        assert_abs_diff_eq!(r2[0], 16.0 / 25.0);
        assert_abs_diff_eq!(r2.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(explained_variance(&d.view(), 0.0), array![0.0, 0.0]);
    }

    #[test]
    fn reconstruction_error_of_exact_factors_is_zero() {
        let u = array![[1.0, 0.0], [0.0, 1.0]];
        let d = array![2.0, 1.0];
        let v = array![[0.0, 1.0], [1.0, 0.0]];
        let a = array![[0.0, 2.0], [1.0, 0.0]];
        let err = reconstruction_error(&a.view(), &u.view(), &d.view(), &v.view()).unwrap();
        assert_abs_diff_eq!(err, 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(orthogonality_error(&u.view()).unwrap(), 0.0);
        assert!(reconstruction_error(&a.view(), &u.view(), &array![1.0].view(), &v.view()).is_none());
    }
}

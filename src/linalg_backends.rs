// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{JobSvd, QR as NdLinalgQR, SVDDCInto as NdLinalgSVDDCInto};
use std::error::Error;
use std::marker::PhantomData;

pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Output of a thin Singular Value Decomposition of an (m x n) matrix, with
/// `p = min(m, n)`.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    /// (m x p)
    pub u: Option<Array2<F>>,
    /// Singular values in descending order, length p.
    pub s: Array1<F>,
    /// (p x n)
    pub vt: Option<Array2<F>>,
}

/// Trait for thin Singular Value Decomposition. Full square factors are
/// never formed.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError>;
}

/// Trait for QR decomposition, focusing on retrieving the thin Q factor.
pub trait BackendQR<F: 'static + Copy + Send + Sync> {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

/// LAPACK through `ndarray-linalg`. The concrete LAPACK build is picked by the
/// `backend_*` cargo features.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            let k_dim = nrows.min(ncols);
            return Ok(SVDOutput {
                u: compute_u.then(|| Array2::zeros((nrows, k_dim))),
                s: Array1::zeros(k_dim),
                vt: compute_v.then(|| Array2::zeros((k_dim, ncols))),
            });
        }
        // divide and conquer computes U and V^T together or not at all
        let job = if compute_u || compute_v {
            JobSvd::Some
        } else {
            JobSvd::None
        };
        let (u, s, vt) = matrix.svddc_into(job).map_err(to_dyn_error)?;
        Ok(SVDOutput {
            u: u.filter(|_| compute_u),
            s,
            vt: vt.filter(|_| compute_v),
        })
    }
}

impl BackendQR<f64> for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        let (q_factor, _r) = matrix.qr().map_err(to_dyn_error)?;
        Ok(q_factor)
    }
}

/// Dispatches to the backend selected at compile time. Every numerical call in
/// the crate goes through this provider.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

impl<F> BackendSVD<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendSVD<F>,
{
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
    }
}

impl<F> BackendQR<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendQR<F>,
{
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.qr_q_factor(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn svd_reconstructs_small_matrix() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let backend = LinAlgBackendProvider::<f64>::new();
        let out = backend.svd_into(a.clone(), true, true).unwrap();
        let u = out.u.unwrap();
        let vt = out.vt.unwrap();
        assert_eq!(u.dim(), (3, 2));
        assert_eq!(vt.dim(), (2, 2));
        assert!(out.s[0] >= out.s[1]);

        let rebuilt = u.dot(&Array2::from_diag(&out.s)).dot(&vt);
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn qr_gives_orthonormal_columns() {
        let a = array![[1.0, 0.5], [2.0, -1.0], [0.0, 3.0], [1.0, 1.0]];
        let q = LinAlgBackendProvider::<f64>::new().qr_q_factor(&a).unwrap();
        assert_eq!(q.dim(), (4, 2));
        let qtq = q.t().dot(&q);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(qtq[[i, j]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn svd_factors_are_thin() {
        let backend = LinAlgBackendProvider::<f64>::new();
        let tall = Array2::from_shape_fn((500, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64 - 5.0);
        let out = backend.svd_into(tall.clone(), true, true).unwrap();
        assert_eq!(out.u.unwrap().dim(), (500, 3));
        assert_eq!(out.vt.unwrap().dim(), (3, 3));

        let wide = tall.t().to_owned();
        let out = backend.svd_into(wide, false, true).unwrap();
        assert!(out.u.is_none());
        assert_eq!(out.vt.unwrap().dim(), (3, 500));

        let out = backend.svd_into(tall, false, false).unwrap();
        assert!(out.u.is_none() && out.vt.is_none());
        assert_eq!(out.s.len(), 3);
    }

    #[test]
    fn empty_matrix_svd_is_empty() {
        let out = NdarrayLinAlgBackend.svd_into(Array2::zeros((0, 3)), true, true).unwrap();
        assert_eq!(out.s.len(), 0);
        assert_eq!(out.vt.unwrap().dim(), (0, 3));
    }
}

// src/rotation.rs

use crate::decomposition::Decomposition;
use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Relative improvement below which varimax stops.
pub const VARIMAX_EPS: f64 = 1e-5;
pub const VARIMAX_MAX_ITER: usize = 1000;

const NORMALIZATION_THRESHOLD: f64 = 1e-12;

/// Rotated loadings and the orthogonal matrix producing them
/// (`loadings = x @ rotation`).
#[derive(Debug, Clone)]
pub struct Varimax {
    pub loadings: Array2<f64>,
    pub rotation: Array2<f64>,
}

/// Varimax rotation of `x` (p x k) without Kaiser normalization.
///
/// Each step takes the SVD of the criterion gradient
/// `B = x^T (z^3 - z diag(colsum(z^2)) / p)` and sets the rotation to `U V^T`.
/// Iteration stops once the sum of the singular values of `B` grows by less
/// than a factor of `1 + eps`, or after `max_iter` steps.
pub fn varimax(x: &ArrayView2<f64>, eps: f64, max_iter: usize) -> Result<Varimax> {
    let (p, k) = x.dim();
    if k < 2 {
        return Ok(Varimax {
            loadings: x.to_owned(),
            rotation: Array2::eye(k),
        });
    }

    let backend = LinAlgBackendProvider::<f64>::new();
    let mut rotation = Array2::<f64>::eye(k);
    let mut criterion = 0.0;
    let mut converged = false;

    for iteration in 0..max_iter {
        let z = x.dot(&rotation);
        let column_sq_sums: Array1<f64> = z.mapv(|v| v * v).sum_axis(Axis(0));
        let shrink = &z * &(column_sq_sums / p as f64);
        let gradient = x.t().dot(&(z.mapv(|v| v * v * v) - shrink));

        let out = backend
            .svd_into(gradient, true, true)
            .map_err(|e| EofError::Linalg(format!("SVD in varimax iteration {} failed: {}", iteration, e)))?;
        let u = out
            .u
            .ok_or_else(|| EofError::Linalg("varimax SVD did not return U".to_string()))?;
        let vt = out
            .vt
            .ok_or_else(|| EofError::Linalg("varimax SVD did not return V^T".to_string()))?;
        rotation = u.dot(&vt);

        let previous = criterion;
        criterion = out.s.sum();
        if criterion < previous * (1.0 + eps) {
            debug!("varimax converged after {} iterations", iteration + 1);
            converged = true;
            break;
        }
    }
    if !converged {
        warn!("varimax did not converge within {} iterations", max_iter);
    }

    Ok(Varimax {
        loadings: x.dot(&rotation),
        rotation,
    })
}

/// Varimax-rotates a decomposition while keeping `U diag(d) V^T` unchanged.
///
/// With loadings `L = V diag(d)` rotated to `L' = L R`:
/// `U' = U R`, `d'_j = ||L'[:, j]||`, `V' = L' diag(1 / d')`.
/// Components whose rotated loadings vanish get a zero singular value and a
/// zero vector. Decompositions with fewer than two components are returned
/// unchanged.
pub fn rotate(decomposition: &Decomposition) -> Result<Decomposition> {
    if decomposition.rank() <= 1 {
        return Ok(decomposition.clone());
    }

    let mut loadings = decomposition.v.clone();
    for (mut column, &d) in loadings.columns_mut().into_iter().zip(decomposition.d.iter()) {
        column *= d;
    }

    let Varimax { loadings: rotated, rotation } = varimax(&loadings.view(), VARIMAX_EPS, VARIMAX_MAX_ITER)?;

    let d = component_norms(&rotated.view());
    let mut v = rotated;
    for (mut column, &norm) in v.columns_mut().into_iter().zip(d.iter()) {
        if norm > NORMALIZATION_THRESHOLD {
            column.mapv_inplace(|x| x / norm);
        } else {
            column.fill(0.0);
        }
    }

    Ok(Decomposition {
        u: decomposition.u.dot(&rotation),
        d,
        v,
    })
}

/// Euclidean norm of every column.
pub fn component_norms(loadings: &ArrayView2<f64>) -> Array1<f64> {
    loadings.map_axis(Axis(0), |column| column.dot(&column).sqrt())
}

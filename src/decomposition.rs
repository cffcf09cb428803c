// src/decomposition.rs

use crate::diagnostics::reconstruction_error;
use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendQR, BackendSVD, LinAlgBackendProvider};
use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Seed used when the caller does not supply one.
pub const DEFAULT_SEED: u64 = 42;

/// Singular value decomposition truncated to `k` triplets.
///
/// The layout does not depend on the orientation of the decomposed matrix:
/// `u` is always (rows x k), `v` is always (cols x k), and `d` is sorted in
/// descending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub u: Array2<f64>,
    pub d: Array1<f64>,
    pub v: Array2<f64>,
}

impl Decomposition {
    pub fn rank(&self) -> usize {
        self.d.len()
    }

    /// `U diag(d) V^T`
    pub fn reconstruct(&self) -> Array2<f64> {
        self.u.dot(&Array2::from_diag(&self.d)).dot(&self.v.t())
    }

    /// `diag(d) V^T`, shape (k x cols).
    pub fn loadings(&self) -> Array2<f64> {
        let mut loadings = self.v.t().to_owned();
        for (mut row, &d) in loadings.rows_mut().into_iter().zip(self.d.iter()) {
            row *= d;
        }
        loadings
    }
}

/// Tuning for the randomized truncated SVD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Extra sketch columns beyond `k`.
    pub oversampling: usize,
    /// Number of QR-stabilized power iterations applied to the sketch.
    pub power_iterations: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        DecompositionConfig {
            oversampling: 10,
            power_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvdStrategy {
    Full,
    Truncated,
}

/// Randomized truncation only pays off (and is only valid) when `k` is small
/// relative to the matrix: `k < min(rows, cols) / 2`.
pub fn choose_strategy(nrows: usize, ncols: usize, k: usize) -> SvdStrategy {
    let min_dim = nrows.min(ncols);
    if 2 * k < min_dim {
        SvdStrategy::Truncated
    } else {
        SvdStrategy::Full
    }
}

/// Computes the leading `k` singular triplets of `matrix`.
///
/// # Errors
/// - `k` is zero or larger than `min(rows, cols)`.
/// - The matrix contains NaN or infinite values.
/// - The backend QR or SVD fails.
pub fn decompose(
    matrix: &Array2<f64>,
    k: usize,
    config: &DecompositionConfig,
    rng: &mut ChaCha8Rng,
) -> Result<Decomposition> {
    let (nrows, ncols) = matrix.dim();
    let max_rank = nrows.min(ncols);
    if k == 0 {
        return Err(EofError::InvalidComponent(0));
    }
    if k > max_rank {
        return Err(EofError::ComponentOutOfRange {
            requested: k,
            max: max_rank,
        });
    }
    let non_finite = matrix.iter().filter(|x| !x.is_finite()).count();
    if non_finite > 0 {
        return Err(EofError::NonFiniteMatrix(non_finite));
    }

    let strategy = choose_strategy(nrows, ncols, k);
    debug!("decomposing {}x{} matrix, k={}, strategy={:?}", nrows, ncols, k, strategy);

    let decomposition = match strategy {
        SvdStrategy::Full => full_svd(matrix, k)?,
        SvdStrategy::Truncated => {
            if nrows >= ncols {
                randomized_svd(&matrix.view(), k, config, rng)?
            } else {
                // Sketch the tall orientation and swap the factors back.
                let flipped = randomized_svd(&matrix.t(), k, config, rng)?;
                Decomposition {
                    u: flipped.v,
                    d: flipped.d,
                    v: flipped.u,
                }
            }
        }
    };

    if log::log_enabled!(log::Level::Debug) {
        if let Some(err) = reconstruction_error(
            &matrix.view(),
            &decomposition.u.view(),
            &decomposition.d.view(),
            &decomposition.v.view(),
        ) {
            debug!("relative rank-{} reconstruction error: {:.3e}", k, err);
        }
    }
    Ok(decomposition)
}

fn full_svd(matrix: &Array2<f64>, k: usize) -> Result<Decomposition> {
    let backend = LinAlgBackendProvider::<f64>::new();
    let out = backend
        .svd_into(matrix.to_owned(), true, true)
        .map_err(|e| EofError::Linalg(format!("SVD of data matrix failed: {}", e)))?;
    let u = out
        .u
        .ok_or_else(|| EofError::Linalg("SVD did not return U".to_string()))?;
    let vt = out
        .vt
        .ok_or_else(|| EofError::Linalg("SVD did not return V^T".to_string()))?;

    Ok(Decomposition {
        u: u.slice(s![.., ..k]).to_owned(),
        d: out.s.slice(s![..k]).to_owned(),
        v: vt.slice(s![..k, ..]).t().to_owned(),
    })
}

/// Randomized range finder followed by an exact SVD of the projected matrix.
/// Expects a tall (or square) input.
fn randomized_svd(
    a: &ArrayView2<f64>,
    k: usize,
    config: &DecompositionConfig,
    rng: &mut ChaCha8Rng,
) -> Result<Decomposition> {
    let backend = LinAlgBackendProvider::<f64>::new();
    let (nrows, ncols) = a.dim();
    let sketch_width = (k + config.oversampling).min(nrows.min(ncols)).max(k);

    // Y = A @ Omega, Omega ~ N(0, 1) of shape (cols x l)
    let omega = Array2::<f64>::random_using((ncols, sketch_width), StandardNormal, rng);
    let mut q_basis = backend
        .qr_q_factor(&a.dot(&omega))
        .map_err(|e| EofError::Linalg(format!("QR of initial sketch failed: {}", e)))?;

    for i in 0..config.power_iterations {
        let w_basis = backend
            .qr_q_factor(&a.t().dot(&q_basis))
            .map_err(|e| EofError::Linalg(format!("QR of W (power iteration {}) failed: {}", i, e)))?;
        q_basis = backend
            .qr_q_factor(&a.dot(&w_basis))
            .map_err(|e| EofError::Linalg(format!("QR of Z (power iteration {}) failed: {}", i, e)))?;
    }

    // B = Q^T A is small (l x cols)
    let b_projected = q_basis.t().dot(a);
    let out = backend
        .svd_into(b_projected, true, true)
        .map_err(|e| EofError::Linalg(format!("SVD of projected sketch failed: {}", e)))?;
    let u_b = out
        .u
        .ok_or_else(|| EofError::Linalg("sketch SVD did not return U".to_string()))?;
    let vt_b = out
        .vt
        .ok_or_else(|| EofError::Linalg("sketch SVD did not return V^T".to_string()))?;

    Ok(Decomposition {
        u: q_basis.dot(&u_b.slice(s![.., ..k])),
        d: out.s.slice(s![..k]).to_owned(),
        v: vt_b.slice(s![..k, ..]).t().to_owned(),
    })
}

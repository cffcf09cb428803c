// src/bootstrap.rs
//
// Confidence intervals for singular values by resampling the columns of
// precomputed loadings instead of the raw data.

use crate::error::{EofError, Result};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use crate::rotation::{component_norms, varimax, VARIMAX_EPS, VARIMAX_MAX_ITER};
use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Bootstrap quantiles of the leading `k` singular values.
///
/// * `loadings` - `diag(d) V^T` of the (possibly rotated) decomposition, shape (k' x cols), k' >= k.
/// * `samples` - number of bootstrap replicates, at least 2.
/// * `probs` - probabilities in [0, 1] at which the replicate distribution is summarized.
/// * `rotate` - varimax-rotate every replicate and use the rotated component norms.
///
/// Every replicate draws `cols` column indices with replacement and takes the
/// SVD of the resampled matrix. One sub-seed per replicate is drawn from `rng`
/// up front, so results do not depend on how rayon schedules the replicates.
///
/// Returns a (k x probs.len()) matrix of type-7 quantiles.
pub fn bootstrap(
    loadings: &ArrayView2<f64>,
    k: usize,
    samples: usize,
    probs: &[f64],
    rotate: bool,
    rng: &mut ChaCha8Rng,
) -> Result<Array2<f64>> {
    if samples <= 1 {
        return Err(EofError::InvalidBootstrap);
    }
    if k == 0 {
        return Err(EofError::InvalidComponent(0));
    }
    // every replicate needs k singular values
    let max = loadings.nrows().min(loadings.ncols());
    if k > max {
        return Err(EofError::ComponentOutOfRange { requested: k, max });
    }
    if let Some(&p) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(EofError::InvalidProbability(p));
    }

    info!(
        "bootstrapping {} singular values from {} replicates of a {}x{} loadings matrix",
        k,
        samples,
        loadings.nrows(),
        loadings.ncols()
    );
    let start_time = std::time::Instant::now();

    let seeds: Vec<u64> = (0..samples).map(|_| rng.gen()).collect();
    let replicates: Vec<Array1<f64>> = seeds
        .into_par_iter()
        .map(|seed| replicate(loadings, k, rotate, seed))
        .collect::<Result<Vec<_>>>()?;

    // samples x k
    let mut draws = Array2::<f64>::zeros((samples, k));
    for (mut row, values) in draws.rows_mut().into_iter().zip(&replicates) {
        row.assign(values);
    }

    let mut out = Array2::<f64>::zeros((k, probs.len()));
    for (component, column) in draws.axis_iter(Axis(1)).enumerate() {
        let mut sorted = column.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        for (j, &p) in probs.iter().enumerate() {
            out[[component, j]] = quantile_sorted(&sorted, p);
        }
    }

    debug!("bootstrap finished in {:?}", start_time.elapsed());
    Ok(out)
}

fn replicate(loadings: &ArrayView2<f64>, k: usize, rotate: bool, seed: u64) -> Result<Array1<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ncols = loadings.ncols();
    let picks: Vec<usize> = (0..ncols).map(|_| rng.gen_range(0..ncols)).collect();
    let resampled = loadings.select(Axis(1), &picks);

    let backend = LinAlgBackendProvider::<f64>::new();
    if !rotate {
        let out = backend
            .svd_into(resampled, false, false)
            .map_err(|e| EofError::Linalg(format!("SVD of bootstrap replicate failed: {}", e)))?;
        return Ok(out.s.slice(s![..k]).to_owned());
    }

    // Loadings of the replicate, V_b diag(s_b) = M^T U_b, without forming the full V_b.
    let out = backend
        .svd_into(resampled.clone(), true, false)
        .map_err(|e| EofError::Linalg(format!("SVD of bootstrap replicate failed: {}", e)))?;
    let u = out
        .u
        .ok_or_else(|| EofError::Linalg("bootstrap SVD did not return U".to_string()))?;
    let replicate_loadings = resampled.t().dot(&u.slice(s![.., ..k]));
    let rotated = varimax(&replicate_loadings.view(), VARIMAX_EPS, VARIMAX_MAX_ITER)?;
    Ok(component_norms(&rotated.loadings.view()))
}

/// Quantile of already sorted data by linear interpolation between order
/// statistics (Hyndman & Fan type 7). NaN for empty input.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p;
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

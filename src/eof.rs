// src/eof.rs

use crate::bootstrap::bootstrap;
use crate::bridge::{component_labels, components_to_tidy, to_matrix, Fill};
use crate::decomposition::{decompose, DecompositionConfig, DEFAULT_SEED};
use crate::diagnostics::{abs_frob_norm, explained_variance};
use crate::error::{EofError, Result};
use crate::result::{EofResult, R2_COLUMN, SD_COLUMN};
use crate::rotation::rotate;
use crate::table::require;
use log::info;
use ndarray::s;
use polars::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which columns of the tidy table form the matrix: the parsed form of a
/// `value ~ rows | cols` style formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub row_vars: Vec<String>,
    pub col_vars: Vec<String>,
    pub value_var: String,
}

impl AxisSpec {
    pub fn new<S: Into<String>>(
        row_vars: impl IntoIterator<Item = S>,
        col_vars: impl IntoIterator<Item = S>,
        value_var: impl Into<String>,
    ) -> Self {
        Self {
            row_vars: row_vars.into_iter().map(Into::into).collect(),
            col_vars: col_vars.into_iter().map(Into::into).collect(),
            value_var: value_var.into(),
        }
    }
}

/// Parameters of an EOF run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EofConfig {
    /// 1-based component indices to return; `None` returns every component.
    pub n: Option<Vec<usize>>,
    /// Bootstrap replicates for singular value confidence intervals. Values of
    /// 0 or 1 disable the bootstrap.
    pub bootstrap_samples: usize,
    /// Named probabilities at which the bootstrap distribution is summarized.
    /// Each name becomes a column of `sdev`.
    pub probs: Vec<(String, f64)>,
    /// Apply a varimax rotation to the retained components.
    pub rotate: bool,
    /// Prefix of the component labels and name of the label column.
    pub suffix: String,
    pub fill: Fill,
    /// Seed of the generators used by the randomized SVD and the bootstrap.
    pub seed: u64,
    pub decomposition: DecompositionConfig,
}

impl Default for EofConfig {
    fn default() -> Self {
        EofConfig {
            n: None,
            bootstrap_samples: 0,
            probs: vec![
                ("lower".to_string(), 0.025),
                ("mid".to_string(), 0.5),
                ("upper".to_string(), 0.975),
            ],
            rotate: false,
            suffix: "PC".to_string(),
            fill: Fill::Dense,
            seed: DEFAULT_SEED,
            decomposition: DecompositionConfig::default(),
        }
    }
}

/// Computes Empirical Orthogonal Functions of `data`.
///
/// The table is reshaped into a (rows x cols) matrix following `axes`, the
/// leading `max(n)` singular triplets are computed (randomized when that is a
/// small fraction of the matrix), optionally varimax-rotated, optionally
/// bootstrapped, and the requested components are returned in tidy form.
///
/// # Errors
/// Argument errors (missing columns, invalid component indices or
/// probabilities, output column names that would collide) are reported before
/// any computation. Non-rectangular data
/// without a `fill`, non-finite matrices and backend failures are reported as
/// they occur. Nothing is returned on error.
///
/// # Examples
///
/// ```
/// use polars::prelude::*;
/// use tidy_eof::{eof, AxisSpec, EofConfig};
///
/// let data = df!(
///     "state" => ["A", "A", "B", "B"],
///     "crime" => ["x", "y", "x", "y"],
///     "rate" => [1.0, 1.0, 1.0, 2.0]
/// )
/// .unwrap();
/// let axes = AxisSpec::new(["state"], ["crime"], "rate");
/// let result = eof(&data, &axes, &EofConfig::default()).unwrap();
/// assert_eq!(result.components().unwrap(), vec![1, 2]);
/// ```
pub fn eof(data: &DataFrame, axes: &AxisSpec, config: &EofConfig) -> Result<EofResult> {
    // --- 1. Argument validation ---
    if axes.row_vars.is_empty() {
        return Err(EofError::EmptyAxis("row"));
    }
    if axes.col_vars.is_empty() {
        return Err(EofError::EmptyAxis("column"));
    }
    let mut required: Vec<&str> = axes.row_vars.iter().map(String::as_str).collect();
    required.extend(axes.col_vars.iter().map(String::as_str));
    required.push(axes.value_var.as_str());
    require(data, required.as_slice())?;

    let requested = match &config.n {
        Some(n) => Some(unique_components(n)?),
        None => None,
    };
    let bootstrap_enabled = config.bootstrap_samples > 1;
    if bootstrap_enabled {
        if let Some((_, p)) = config.probs.iter().find(|(_, p)| !(0.0..=1.0).contains(p)) {
            return Err(EofError::InvalidProbability(*p));
        }
    }

    // left / right: axis variables, label, value
    required.push(config.suffix.as_str());
    ensure_distinct(required.iter().copied())?;
    // sdev: label, sd, r2 and the probability columns
    let prob_names = config.probs.iter().map(|(name, _)| name.as_str());
    let sdev_names = [config.suffix.as_str(), SD_COLUMN, R2_COLUMN]
        .into_iter()
        .chain(prob_names.filter(|_| bootstrap_enabled));
    ensure_distinct(sdev_names)?;

    info!(
        "Starting EOF. Observations={}, row vars={:?}, col vars={:?}, value={}",
        data.height(),
        axes.row_vars,
        axes.col_vars,
        axes.value_var
    );
    let start_time = std::time::Instant::now();

    // --- 2. Reshape ---
    let tidy_matrix = to_matrix(
        data,
        axes.row_vars.as_slice(),
        axes.col_vars.as_slice(),
        &axes.value_var,
        config.fill,
    )?;
    let matrix = &tidy_matrix.matrix;
    let max_rank = matrix.nrows().min(matrix.ncols());

    let components = requested.unwrap_or_else(|| (1..=max_rank).collect());
    let k = components.iter().copied().max().ok_or(EofError::NoComponents)?;
    if k > max_rank {
        return Err(EofError::ComponentOutOfRange {
            requested: k,
            max: max_rank,
        });
    }

    // --- 3. Decompose and rotate ---
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut decomposition = decompose(matrix, k, &config.decomposition, &mut rng)?;
    if config.rotate && k > 1 {
        decomposition = rotate(&decomposition)?;
    }
    let total_norm = abs_frob_norm(&matrix.view());
    let r2 = explained_variance(&decomposition.d.view(), total_norm);

    // --- 4. Bootstrap ---
    let intervals = if bootstrap_enabled {
        let probs: Vec<f64> = config.probs.iter().map(|(_, p)| *p).collect();
        let mut bootstrap_rng = ChaCha8Rng::seed_from_u64(config.seed);
        Some(bootstrap(
            &decomposition.loadings().view(),
            k,
            config.bootstrap_samples,
            &probs,
            config.rotate,
            &mut bootstrap_rng,
        )?)
    } else {
        None
    };

    // --- 5. Back to tidy form ---
    let left = components_to_tidy(
        &decomposition.u.view(),
        &tidy_matrix.rows,
        &components,
        &config.suffix,
        &axes.value_var,
    )?;
    let right = components_to_tidy(
        &decomposition.v.view(),
        &tidy_matrix.cols,
        &components,
        &config.suffix,
        &axes.value_var,
    )?;

    let picked: Vec<usize> = components.iter().map(|&i| i - 1).collect();
    let labels = component_labels(&components, &config.suffix);
    let mut sdev_columns: Vec<Column> = vec![
        Series::new(config.suffix.as_str().into(), labels.clone()).into(),
        Series::new(SD_COLUMN.into(), picked.iter().map(|&i| decomposition.d[i]).collect::<Vec<f64>>()).into(),
        Series::new(R2_COLUMN.into(), picked.iter().map(|&i| r2[i]).collect::<Vec<f64>>()).into(),
    ];
    if let Some(intervals) = intervals {
        for (j, (name, _)) in config.probs.iter().enumerate() {
            let column = intervals.slice(s![.., j]);
            let values: Vec<f64> = picked.iter().map(|&i| column[i]).collect();
            sdev_columns.push(Series::new(name.as_str().into(), values).into());
        }
    }
    let sdev = DataFrame::new(sdev_columns)?;

    info!(
        "EOF of {}x{} matrix finished in {:?}: {} components, r2 total {:.4}",
        matrix.nrows(),
        matrix.ncols(),
        start_time.elapsed(),
        components.len(),
        picked.iter().map(|&i| r2[i]).sum::<f64>()
    );

    Ok(EofResult::new(
        left,
        right,
        sdev,
        labels,
        config.suffix.clone(),
        axes.value_var.clone(),
        axes.row_vars.clone(),
        axes.col_vars.clone(),
    ))
}

/// Fails on the first name that was already seen.
fn ensure_distinct<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Err(EofError::DuplicateColumn(name.to_string()));
        }
        seen.push(name);
    }
    Ok(())
}

/// Validates 1-based indices and drops repeats, keeping first occurrences.
fn unique_components(n: &[usize]) -> Result<Vec<usize>> {
    let mut out: Vec<usize> = Vec::with_capacity(n.len());
    for &i in n {
        if i == 0 {
            return Err(EofError::InvalidComponent(i));
        }
        if !out.contains(&i) {
            out.push(i);
        }
    }
    if out.is_empty() {
        return Err(EofError::NoComponents);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_list_validation() {
        assert_eq!(unique_components(&[3, 1, 3, 4]).unwrap(), vec![3, 1, 4]);
        assert_eq!(unique_components(&[0, 1]).unwrap_err(), EofError::InvalidComponent(0));
        assert_eq!(unique_components(&[]).unwrap_err(), EofError::NoComponents);
    }

    #[test]
    fn output_names_must_be_distinct() {
        assert!(ensure_distinct(["lat", "time", "PC", "temp"]).is_ok());
        assert_eq!(
            ensure_distinct(["PC", "sd", "r2", "sd"]).unwrap_err(),
            EofError::DuplicateColumn("sd".to_string())
        );
    }

    #[test]
    fn default_config() {
        let config = EofConfig::default();
        assert_eq!(config.suffix, "PC");
        assert_eq!(config.seed, 42);
        assert_eq!(config.fill, Fill::Dense);
        assert_eq!(
            config.probs.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![0.025, 0.5, 0.975]
        );
    }
}

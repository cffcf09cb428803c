// src/result.rs

use crate::bridge::{to_matrix, to_tidy, Fill};
use crate::error::{EofError, Result};
use crate::table::{index_ca, numeric_column, text_column};
use ndarray::Array2;
use polars::prelude::*;
use std::collections::HashMap;

/// Column of `sdev` holding the singular values.
pub const SD_COLUMN: &str = "sd";
/// Column of `sdev` holding the explained variance fraction.
pub const R2_COLUMN: &str = "r2";

/// Result of an EOF decomposition in tidy form.
///
/// * `left` - row-axis variables, component label, value of the left singular vectors.
/// * `right` - column-axis variables, component label, value of the right singular vectors.
/// * `sdev` - component label, `sd`, `r2` and one column per bootstrap probability.
///
/// The component label column is named after `suffix` and holds
/// `"{suffix}{i}"`. Its ordered level set is [`EofResult::levels`], which
/// truncation leaves untouched.
#[derive(Debug, Clone)]
pub struct EofResult {
    left: DataFrame,
    right: DataFrame,
    sdev: DataFrame,
    levels: Vec<String>,
    suffix: String,
    value_var: String,
    left_vars: Vec<String>,
    right_vars: Vec<String>,
}

impl EofResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        left: DataFrame,
        right: DataFrame,
        sdev: DataFrame,
        levels: Vec<String>,
        suffix: String,
        value_var: String,
        left_vars: Vec<String>,
        right_vars: Vec<String>,
    ) -> Self {
        Self {
            left,
            right,
            sdev,
            levels,
            suffix,
            value_var,
            left_vars,
            right_vars,
        }
    }

    pub fn left(&self) -> &DataFrame {
        &self.left
    }

    pub fn right(&self) -> &DataFrame {
        &self.right
    }

    pub fn sdev(&self) -> &DataFrame {
        &self.sdev
    }

    /// Every component label the decomposition was asked for, in request order.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn value_var(&self) -> &str {
        &self.value_var
    }

    /// Row-axis variable names, as they appear in `left`.
    pub fn left_vars(&self) -> &[String] {
        &self.left_vars
    }

    /// Column-axis variable names, as they appear in `right`.
    pub fn right_vars(&self) -> &[String] {
        &self.right_vars
    }

    /// Numeric index of a component label, e.g. `"PC3"` -> 3.
    pub fn component_index(&self, label: &str) -> Option<usize> {
        label.strip_prefix(self.suffix.as_str())?.parse().ok()
    }

    /// Indices of the components present in `sdev`, in table order.
    pub fn components(&self) -> Result<Vec<usize>> {
        Ok(text_column(&self.sdev, &self.suffix)?
            .iter()
            .filter_map(|label| self.component_index(label))
            .collect())
    }

    /// Singular value of every component present in `sdev`.
    pub fn singular_values(&self) -> Result<Vec<(usize, f64)>> {
        let sd = numeric_column(&self.sdev, SD_COLUMN)?;
        Ok(text_column(&self.sdev, &self.suffix)?
            .iter()
            .zip(sd.iter())
            .filter_map(|(label, &s)| self.component_index(label).map(|c| (c, s)))
            .collect())
    }

    /// Restricts all three tables to the components in `n`.
    pub fn truncate(&self, n: &[usize]) -> Result<EofResult> {
        Ok(EofResult {
            left: self.keep_components(&self.left, n)?,
            right: self.keep_components(&self.right, n)?,
            sdev: self.keep_components(&self.sdev, n)?,
            ..self.clone()
        })
    }

    /// Reconstructs the data from the components in `n` (all when `None`).
    ///
    /// Right vectors are scaled by their singular values, both sides are
    /// reshaped into (axis x component) matrices and multiplied. The result is
    /// keyed by the column-axis variables followed by the row-axis variables,
    /// with the reconstructed value under `value_var`.
    pub fn predict(&self, n: Option<&[usize]>) -> Result<DataFrame> {
        let selected = match n {
            Some(n) => self.truncate(n)?,
            None => self.clone(),
        };
        if selected.sdev.height() == 0 {
            return Err(EofError::NoComponents);
        }

        let sd_by_label: HashMap<String, f64> = text_column(&selected.sdev, &selected.suffix)?
            .into_iter()
            .zip(numeric_column(&selected.sdev, SD_COLUMN)?.to_vec())
            .collect();

        let scaled_right = {
            let labels = text_column(&selected.right, &selected.suffix)?;
            let values = numeric_column(&selected.right, &selected.value_var)?;
            let scaled: Vec<f64> = labels
                .iter()
                .zip(values.iter())
                .map(|(label, &x)| x * sd_by_label.get(label).copied().unwrap_or(0.0))
                .collect();
            let mut vars: Vec<&str> = selected.right_vars.iter().map(String::as_str).collect();
            vars.push(&selected.suffix);
            let mut frame = selected.right.select(vars)?;
            frame.hstack_mut(&[Series::new(selected.value_var.as_str().into(), scaled).into()])?;
            frame
        };

        let suffix = [selected.suffix.as_str()];
        let left_vars: Vec<&str> = selected.left_vars.iter().map(String::as_str).collect();
        let right_vars: Vec<&str> = selected.right_vars.iter().map(String::as_str).collect();
        let left = to_matrix(
            &selected.left,
            left_vars.as_slice(),
            &suffix[..],
            &selected.value_var,
            Fill::Dense,
        )?;
        let right = to_matrix(
            &scaled_right,
            right_vars.as_slice(),
            &suffix[..],
            &selected.value_var,
            Fill::Dense,
        )?;

        // line up the component columns of both sides
        let k = left.cols.len();
        let mut right_aligned = Array2::<f64>::zeros((right.matrix.nrows(), k));
        for j in 0..k {
            if let Some(pos) = right.cols.position(left.cols.key(j)) {
                right_aligned.column_mut(j).assign(&right.matrix.column(pos));
            }
        }

        let reconstructed = right_aligned.dot(&left.matrix.t());
        to_tidy(&reconstructed.view(), &right.rows, &left.rows, &selected.value_var)
    }

    fn keep_components(&self, table: &DataFrame, n: &[usize]) -> Result<DataFrame> {
        let keep: Vec<usize> = text_column(table, &self.suffix)?
            .iter()
            .enumerate()
            .filter(|(_, label)| self.component_index(label).is_some_and(|i| n.contains(&i)))
            .map(|(row, _)| row)
            .collect();
        Ok(table.take(&index_ca(&keep))?)
    }
}

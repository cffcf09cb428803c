// src/bridge.rs
//
// Conversion between long-format tables and dense matrices.

use crate::error::{EofError, Result};
use crate::table::{column_names, index_ca, numeric_column, require};
use log::{debug, warn};
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How cells missing from the tidy table are treated when building a matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Fill {
    /// Every (row, column) combination must be observed exactly once.
    #[default]
    Dense,
    /// Missing cells take this value (NaN allowed).
    Value(#[serde(with = "fill_value")] f64),
}

impl Fill {
    /// Interprets a user supplied scalar: numbers (including NaN) fill, null
    /// means dense, anything else is rejected.
    pub fn from_any_value(value: &AnyValue) -> Result<Fill> {
        match value {
            AnyValue::Null => Ok(Fill::Dense),
            AnyValue::Boolean(_) | AnyValue::String(_) | AnyValue::StringOwned(_) => {
                Err(EofError::InvalidFill(value.to_string()))
            }
            other => other
                .extract::<f64>()
                .map(Fill::Value)
                .ok_or_else(|| EofError::InvalidFill(other.to_string())),
        }
    }
}

impl From<Option<f64>> for Fill {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Fill::Dense, Fill::Value)
    }
}

/// JSON has no NaN or infinities, so those fill values are written as the
/// strings `"NaN"`, `"inf"` and `"-inf"`.
mod fill_value {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if x.is_nan() {
            Repr::Special("NaN".to_string())
        } else if *x == f64::INFINITY {
            Repr::Special("inf".to_string())
        } else if *x == f64::NEG_INFINITY {
            Repr::Special("-inf".to_string())
        } else {
            Repr::Number(*x)
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(x) => Ok(x),
            Repr::Special(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid fill value {:?}", other))),
            },
        }
    }
}

/// One component of an [`AxisKey`]. Numeric values are keyed by their bit
/// pattern after folding `-0.0` into `0.0` and every NaN into one canonical NaN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Num(u64),
    Text(String),
    Null,
}

impl KeyPart {
    fn num(x: f64) -> KeyPart {
        let x = if x == 0.0 {
            0.0
        } else if x.is_nan() {
            f64::NAN
        } else {
            x
        };
        KeyPart::Num(x.to_bits())
    }

    fn text(s: Option<&str>) -> KeyPart {
        s.map_or(KeyPart::Null, |s| KeyPart::Text(s.to_string()))
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Num(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyPart::Text(s) => write!(f, "{}", s),
            KeyPart::Null => write!(f, "null"),
        }
    }
}

/// Per-row key parts of one key column. Text columns are keyed by their
/// strings, anything castable to `f64` numerically, the rest by its text form.
fn key_parts(column: &Column) -> Result<Vec<KeyPart>> {
    if column.dtype() == &DataType::String {
        return Ok(column.str()?.into_iter().map(KeyPart::text).collect());
    }
    if let Ok(numeric) = column.cast(&DataType::Float64) {
        if numeric.null_count() == column.null_count() {
            return Ok(numeric
                .f64()?
                .into_iter()
                .map(|v| v.map_or(KeyPart::Null, KeyPart::num))
                .collect());
        }
    }
    let text = column.cast(&DataType::String)?;
    Ok(text.str()?.into_iter().map(KeyPart::text).collect())
}

/// Ordered tuple of axis-variable values identifying one matrix row or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisKey(pub Vec<KeyPart>);

/// Bijection between axis keys and 0-based matrix positions.
///
/// The distinct key values are kept as a small data frame (one column per axis
/// variable, one row per position) so they can be written back out with their
/// original column types.
#[derive(Debug, Clone)]
pub struct AxisIndex {
    keys: DataFrame,
    vars: Vec<String>,
    by_position: Vec<AxisKey>,
    lookup: HashMap<AxisKey, usize>,
}

impl AxisIndex {
    /// Groups the rows of `df` by `vars`, numbering groups in order of first
    /// appearance. Returns the index and the group id of every input row.
    pub fn group<S: AsRef<str>>(df: &DataFrame, vars: &[S]) -> Result<(AxisIndex, Vec<usize>)> {
        require(df, vars)?;
        let names: Vec<&str> = vars.iter().map(|s| s.as_ref()).collect();
        let key_frame = df.select(names)?;
        let mut parts = Vec::with_capacity(key_frame.width());
        for column in key_frame.get_columns() {
            parts.push(key_parts(column)?);
        }

        let mut lookup: HashMap<AxisKey, usize> = HashMap::new();
        let mut by_position = Vec::new();
        let mut first_rows = Vec::new();
        let mut group_ids = Vec::with_capacity(key_frame.height());
        for row in 0..key_frame.height() {
            let key = AxisKey(parts.iter().map(|p| p[row].clone()).collect());
            let id = match lookup.get(&key) {
                Some(&id) => id,
                None => {
                    let id = by_position.len();
                    lookup.insert(key.clone(), id);
                    by_position.push(key);
                    first_rows.push(row);
                    id
                }
            };
            group_ids.push(id);
        }

        let index = AxisIndex {
            vars: column_names(&key_frame),
            keys: key_frame.take(&index_ca(&first_rows))?,
            by_position,
            lookup,
        };
        Ok((index, group_ids))
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Distinct key values, one row per matrix position.
    pub fn keys(&self) -> &DataFrame {
        &self.keys
    }

    pub fn position(&self, key: &AxisKey) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    pub fn key(&self, position: usize) -> &AxisKey {
        &self.by_position[position]
    }

    /// Human readable `var=value` list for error messages.
    pub fn describe(&self, position: usize) -> String {
        self.vars
            .iter()
            .zip(&self.by_position[position].0)
            .map(|(name, part)| format!("{}={}", name, part))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A dense matrix together with the axis indexes that label its rows and columns.
#[derive(Debug, Clone)]
pub struct TidyMatrix {
    pub matrix: Array2<f64>,
    pub rows: AxisIndex,
    pub cols: AxisIndex,
}

/// Reshapes a long table into a dense `rows x cols` matrix.
///
/// With [`Fill::Dense`] the table must hold exactly one observation per
/// (row, column) combination: repeated combinations are reported as
/// [`EofError::DuplicateCell`] and missing ones as [`EofError::NotRectangular`].
/// With [`Fill::Value`] missing cells take the fill value and repeated
/// combinations overwrite each other in input order.
pub fn to_matrix<S: AsRef<str>>(
    df: &DataFrame,
    row_vars: &[S],
    col_vars: &[S],
    value_var: &str,
    fill: Fill,
) -> Result<TidyMatrix> {
    if row_vars.is_empty() {
        return Err(EofError::EmptyAxis("row"));
    }
    if col_vars.is_empty() {
        return Err(EofError::EmptyAxis("column"));
    }
    let mut required: Vec<&str> = row_vars.iter().map(|s| s.as_ref()).collect();
    required.extend(col_vars.iter().map(|s| s.as_ref()));
    required.push(value_var);
    require(df, required.as_slice())?;
    let values = numeric_column(df, value_var)?;

    let (rows, row_ids) = AxisIndex::group(df, row_vars)?;
    let (cols, col_ids) = AxisIndex::group(df, col_vars)?;
    let shape = (rows.len(), cols.len());
    let observations = df.height();

    let matrix = match fill {
        Fill::Dense => {
            let mut matrix = Array2::from_elem(shape, f64::NAN);
            let mut written = Array2::from_elem(shape, false);
            for ((&r, &c), &x) in row_ids.iter().zip(&col_ids).zip(values.iter()) {
                if written[[r, c]] {
                    return Err(EofError::DuplicateCell {
                        row: rows.describe(r),
                        col: cols.describe(c),
                    });
                }
                written[[r, c]] = true;
                matrix[[r, c]] = x;
            }
            let filled = written.iter().filter(|&&w| w).count();
            if filled != observations || filled != shape.0 * shape.1 {
                return Err(EofError::NotRectangular {
                    filled,
                    rows: shape.0,
                    cols: shape.1,
                    observations,
                });
            }
            matrix
        }
        Fill::Value(fill_value) => {
            let mut matrix = Array2::from_elem(shape, fill_value);
            let mut written = Array2::from_elem(shape, false);
            let mut overwritten = 0usize;
            for ((&r, &c), &x) in row_ids.iter().zip(&col_ids).zip(values.iter()) {
                if written[[r, c]] {
                    overwritten += 1;
                }
                written[[r, c]] = true;
                matrix[[r, c]] = x;
            }
            if overwritten > 0 {
                warn!(
                    "{} observations overwrote an earlier value for the same cell; the last one was kept",
                    overwritten
                );
            }
            let missing = written.iter().filter(|&&w| !w).count();
            debug!("filled {} missing cells with {}", missing, fill_value);
            matrix
        }
    };

    debug!(
        "reshaped {} observations into a {}x{} matrix",
        observations, shape.0, shape.1
    );
    Ok(TidyMatrix { matrix, rows, cols })
}

/// Inverse of [`to_matrix`]: one row per matrix cell in row-major order, with
/// the axis columns followed by the cell value under `value_var`.
pub fn to_tidy(
    matrix: &ArrayView2<f64>,
    rows: &AxisIndex,
    cols: &AxisIndex,
    value_var: &str,
) -> Result<DataFrame> {
    check_dim("matrix rows vs row axis", rows.len(), matrix.nrows())?;
    check_dim("matrix columns vs column axis", cols.len(), matrix.ncols())?;

    let (n_rows, n_cols) = matrix.dim();
    let row_idx: Vec<usize> = (0..n_rows).flat_map(|i| std::iter::repeat(i).take(n_cols)).collect();
    let col_idx: Vec<usize> = (0..n_rows).flat_map(|_| 0..n_cols).collect();
    let values: Vec<f64> = matrix.iter().copied().collect();

    let mut out = rows.keys().take(&index_ca(&row_idx))?;
    let col_part = cols.keys().take(&index_ca(&col_idx))?;
    out.hstack_mut(col_part.get_columns())?;
    out.hstack_mut(&[Series::new(value_var.into(), values).into()])?;
    Ok(out)
}

/// Projects the columns of `vectors` (one column per computed component,
/// component `i` in column `i - 1`) into tidy form for the requested 1-based
/// `components`.
///
/// Rows are component-major. The component label column is named `suffix`
/// and holds `"{suffix}{i}"`.
pub fn components_to_tidy(
    vectors: &ArrayView2<f64>,
    axis: &AxisIndex,
    components: &[usize],
    suffix: &str,
    value_var: &str,
) -> Result<DataFrame> {
    check_dim("vector rows vs axis", axis.len(), vectors.nrows())?;
    for &component in components {
        if component == 0 {
            return Err(EofError::InvalidComponent(component));
        }
        if component > vectors.ncols() {
            return Err(EofError::ComponentOutOfRange {
                requested: component,
                max: vectors.ncols(),
            });
        }
    }

    let n_axis = axis.len();
    let axis_idx: Vec<usize> = components.iter().flat_map(|_| 0..n_axis).collect();
    let labels: Vec<String> = component_labels(components, suffix)
        .into_iter()
        .flat_map(|label| std::iter::repeat(label).take(n_axis))
        .collect();
    let values: Vec<f64> = components
        .iter()
        .flat_map(|&component| vectors.column(component - 1).to_vec())
        .collect();

    let mut out = axis.keys().take(&index_ca(&axis_idx))?;
    out.hstack_mut(&[
        Series::new(suffix.into(), labels).into(),
        Series::new(value_var.into(), values).into(),
    ])?;
    Ok(out)
}

/// `"{suffix}{i}"` for each component index.
pub fn component_labels(components: &[usize], suffix: &str) -> Vec<String> {
    components.iter().map(|i| format!("{}{}", suffix, i)).collect()
}

fn check_dim(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(EofError::DimensionMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::text_column;
    use ndarray::array;

    fn crimes() -> DataFrame {
        df!(
            "state" => ["A", "A", "B", "B"],
            "crime" => ["x", "y", "x", "y"],
            "rate" => [1.0, 1.0, 1.0, 2.0]
        )
        .unwrap()
    }

    fn rows(df: &DataFrame, indices: &[usize]) -> DataFrame {
        df.take(&index_ca(indices)).unwrap()
    }

    #[test]
    fn dense_reshape_uses_first_occurrence_order() {
        let tm = to_matrix(&crimes(), &["state"], &["crime"], "rate", Fill::Dense).unwrap();
        assert_eq!(tm.matrix, array![[1.0, 1.0], [1.0, 2.0]]);
        assert_eq!(text_column(tm.rows.keys(), "state").unwrap(), vec!["A", "B"]);
        assert_eq!(text_column(tm.cols.keys(), "crime").unwrap(), vec!["x", "y"]);

        // B first in input order puts B on matrix row 0
        let shuffled = rows(&crimes(), &[3, 0, 1, 2]);
        let tm = to_matrix(&shuffled, &["state"], &["crime"], "rate", Fill::Dense).unwrap();
        assert_eq!(tm.rows.describe(0), "state=B");
        assert_eq!(tm.cols.describe(0), "crime=y");
        assert_eq!(tm.matrix, array![[2.0, 1.0], [1.0, 1.0]]);
    }

    #[test]
    fn missing_cell_is_filled_or_rejected() {
        let partial = rows(&crimes(), &[0, 1, 3]);

        let tm = to_matrix(&partial, &["state"], &["crime"], "rate", Fill::Value(0.0)).unwrap();
        assert_eq!(tm.matrix, array![[1.0, 1.0], [0.0, 2.0]]);

        let err = to_matrix(&partial, &["state"], &["crime"], "rate", Fill::Dense).unwrap_err();
        assert_eq!(
            err,
            EofError::NotRectangular { filled: 3, rows: 2, cols: 2, observations: 3 }
        );
    }

    #[test]
    fn duplicate_cell_is_an_error_when_dense() {
        let dup = rows(&crimes(), &[0, 1, 2, 3, 3]);
        let err = to_matrix(&dup, &["state"], &["crime"], "rate", Fill::Dense).unwrap_err();
        assert_eq!(
            err,
            EofError::DuplicateCell { row: "state=B".into(), col: "crime=y".into() }
        );

        // with an explicit fill the last write wins
        let mut dup = dup.select(["state", "crime"]).unwrap();
        dup.hstack_mut(&[Series::new("rate".into(), vec![1.0, 1.0, 1.0, 2.0, 7.0]).into()])
            .unwrap();
        let tm = to_matrix(&dup, &["state"], &["crime"], "rate", Fill::Value(0.0)).unwrap();
        assert_eq!(tm.matrix[[1, 1]], 7.0);
    }

    #[test]
    fn argument_errors() {
        let t = crimes();
        assert_eq!(
            to_matrix(&t, &["state", "year"], &["crime"], "value", Fill::Dense).unwrap_err(),
            EofError::MissingColumns(vec!["year".into(), "value".into()])
        );
        assert_eq!(
            to_matrix(&t, &["state"], &["crime"], "crime", Fill::Dense).unwrap_err(),
            EofError::NonNumericColumn("crime".into())
        );
        let empty: [&str; 0] = [];
        assert_eq!(
            to_matrix(&t, &empty, &["crime"], "rate", Fill::Dense).unwrap_err(),
            EofError::EmptyAxis("row")
        );
    }

    #[test]
    fn fill_from_scalars() {
        assert!(matches!(
            Fill::from_any_value(&AnyValue::String("zero")),
            Err(EofError::InvalidFill(_))
        ));
        assert!(matches!(
            Fill::from_any_value(&AnyValue::Boolean(true)),
            Err(EofError::InvalidFill(_))
        ));
        assert_eq!(Fill::from_any_value(&AnyValue::Null).unwrap(), Fill::Dense);
        assert_eq!(Fill::from_any_value(&AnyValue::Int32(3)).unwrap(), Fill::Value(3.0));
        assert!(matches!(
            Fill::from_any_value(&AnyValue::Float64(f64::NAN)),
            Ok(Fill::Value(x)) if x.is_nan()
        ));
        assert_eq!(Fill::from(None), Fill::Dense);
        assert_eq!(Fill::from(Some(0.5)), Fill::Value(0.5));
    }

    #[test]
    fn non_finite_fill_survives_json() {
        for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -2.5] {
            let json = serde_json::to_string(&Fill::Value(x)).unwrap();
            let back: Fill = serde_json::from_str(&json).unwrap();
            match back {
                Fill::Value(y) => assert_eq!(y.to_bits(), x.to_bits(), "{}", json),
                Fill::Dense => panic!("{} came back as Dense", json),
            }
        }
        assert_eq!(serde_json::to_string(&Fill::Value(f64::NAN)).unwrap(), r#"{"Value":"NaN"}"#);
        assert!(serde_json::from_str::<Fill>(r#"{"Value":"zero"}"#).is_err());
        let dense: Fill = serde_json::from_str(&serde_json::to_string(&Fill::Dense).unwrap()).unwrap();
        assert_eq!(dense, Fill::Dense);
    }

    #[test]
    fn tidy_round_trip_keeps_values_and_types() {
        let t = df!(
            "lat" => [10.0, 10.0, 10.0, 20.0, 20.0, 20.0],
            "time" => ["t1", "t2", "t3", "t1", "t2", "t3"],
            "z" => [0.1, -3.5, 2.25, 1e-9, 4.0, -0.0]
        )
        .unwrap();
        let tm = to_matrix(&t, &["lat"], &["time"], "z", Fill::Dense).unwrap();
        let back = to_tidy(&tm.matrix.view(), &tm.rows, &tm.cols, "z").unwrap();
        assert_eq!(column_names(&back), column_names(&t));
        assert_eq!(back.column("lat").unwrap().dtype(), &DataType::Float64);
        assert_eq!(text_column(&back, "time").unwrap(), text_column(&t, "time").unwrap());
        let (a, b) = (numeric_column(&back, "z").unwrap(), numeric_column(&t, "z").unwrap());
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn multi_variable_axes() {
        let t = df!(
            "lon" => [1.0, 1.0, 2.0, 2.0],
            "lat" => [5i32, 6, 5, 6],
            "year" => ["1990", "1990", "1990", "1990"],
            "t" => [0.5, 0.6, 0.7, 0.8]
        )
        .unwrap();
        let tm = to_matrix(&t, &["lon", "lat"], &["year"], "t", Fill::Dense).unwrap();
        assert_eq!(tm.matrix.dim(), (4, 1));
        assert_eq!(tm.rows.vars(), &["lon".to_string(), "lat".to_string()]);
        assert_eq!(tm.rows.describe(2), "lon=2, lat=5");
        assert_eq!(tm.rows.position(tm.rows.key(3)), Some(3));
        assert_eq!(tm.rows.keys().column("lat").unwrap().dtype(), &DataType::Int32);
    }

    #[test]
    fn components_are_projected_component_major() {
        let t = crimes();
        let tm = to_matrix(&t, &["state"], &["crime"], "rate", Fill::Dense).unwrap();
        let vectors = array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
        let out = components_to_tidy(&vectors.view(), &tm.rows, &[1, 3], "PC", "rate").unwrap();

        assert_eq!(column_names(&out), vec!["state", "PC", "rate"]);
        assert_eq!(numeric_column(&out, "rate").unwrap().to_vec(), vec![0.1, 0.4, 0.3, 0.6]);
        assert_eq!(text_column(&out, "PC").unwrap(), vec!["PC1", "PC1", "PC3", "PC3"]);
        assert_eq!(text_column(&out, "state").unwrap(), vec!["A", "B", "A", "B"]);

        assert_eq!(
            components_to_tidy(&vectors.view(), &tm.rows, &[4], "PC", "rate").unwrap_err(),
            EofError::ComponentOutOfRange { requested: 4, max: 3 }
        );
    }
}

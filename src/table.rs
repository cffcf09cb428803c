// src/table.rs
//
// Column access on polars data frames holding long-format data.

use crate::error::{EofError, Result};
use ndarray::Array1;
use polars::prelude::*;

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Column names in frame order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Fails with every missing name at once.
pub fn require<S: AsRef<str>>(df: &DataFrame, names: &[S]) -> Result<()> {
    let missing: Vec<String> = names
        .iter()
        .map(|s| s.as_ref())
        .filter(|name| !has_column(df, name))
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EofError::MissingColumns(missing))
    }
}

/// Reads a numeric column into an ndarray vector.
///
/// Text and boolean columns are rejected, as are nulls. NaN and infinite
/// values are passed through unchanged.
pub fn numeric_column(df: &DataFrame, name: &str) -> Result<Array1<f64>> {
    require(df, &[name])?;
    let column = df.column(name)?;
    if matches!(column.dtype(), DataType::String | DataType::Boolean) {
        return Err(EofError::NonNumericColumn(name.to_string()));
    }
    if column.null_count() > 0 {
        return Err(EofError::NullValues(name.to_string()));
    }
    let values = df.select([name])?.to_ndarray::<Float64Type>(IndexOrder::C)?;
    Ok(values.column(0).to_owned())
}

/// Reads a text column. Nulls come back as empty strings.
pub fn text_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    require(df, &[name])?;
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Row positions in the form polars gathers by.
pub fn index_ca(indices: &[usize]) -> IdxCa {
    IdxCa::from_vec(
        "index".into(),
        indices.iter().map(|&i| i as IdxSize).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            "state" => ["A", "A", "B"],
            "year" => [1990i32, 1991, 1990],
            "rate" => [1.0, 2.5, f64::NAN]
        )
        .unwrap()
    }

    #[test]
    fn require_reports_every_missing_column() {
        let df = sample();
        assert!(require(&df, &["state", "rate"]).is_ok());
        assert_eq!(
            require(&df, &["county", "state", "count"]).unwrap_err(),
            EofError::MissingColumns(vec!["county".to_string(), "count".to_string()])
        );
        assert_eq!(column_names(&df), vec!["state", "year", "rate"]);
    }

    #[test]
    fn numeric_columns_are_cast_to_f64() {
        let df = sample();
        assert_eq!(numeric_column(&df, "year").unwrap().to_vec(), vec![1990.0, 1991.0, 1990.0]);
        let rate = numeric_column(&df, "rate").unwrap();
        assert_eq!(rate[1], 2.5);
        assert!(rate[2].is_nan());
        assert_eq!(
            numeric_column(&df, "state").unwrap_err(),
            EofError::NonNumericColumn("state".to_string())
        );
    }

    #[test]
    fn nulls_in_numeric_columns_are_rejected() {
        let df = df!("rate" => [Some(1.0), None]).unwrap();
        assert_eq!(
            numeric_column(&df, "rate").unwrap_err(),
            EofError::NullValues("rate".to_string())
        );
    }

    #[test]
    fn gather_by_index() {
        let df = sample().take(&index_ca(&[2, 0, 0])).unwrap();
        assert_eq!(text_column(&df, "state").unwrap(), vec!["B", "A", "A"]);
        assert_eq!(text_column(&df, "year").unwrap(), vec!["1990", "1990", "1990"]);
    }
}

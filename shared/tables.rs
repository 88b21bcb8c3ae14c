//! # Tabular Cohort Data
//!
//! Cohort-level tables (the feature table, the left-inverse matrix and the feature
//! covariance matrix) are delimited text files with a header row. They are read in
//! full with the `polars` CSV reader and validated strictly: every value that is used
//! must be numeric, present and finite. Failures are reported through [`DataError`].

use ndarray::{Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::files::delimiter_for;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The table '{}' contains no data rows.", .0.display())]
    EmptyTable(PathBuf),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("The column '{0}' appears more than once in the header.")]
    DuplicateColumn(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the column '{0}'. Cohort tables must be complete."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. Cohort tables must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Row {row} is labelled '{found}', but the header order requires '{expected}'.")]
    InconsistentLabels {
        row: usize,
        expected: String,
        found: String,
    },
}

/// Reads a delimited table with a header row. Column types are inferred from the
/// whole file so that an integer-looking prefix does not reject later decimals.
pub fn read_table(path: &Path) -> Result<DataFrame, DataError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default().with_separator(delimiter_for(path)),
                ),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(DataError::EmptyTable(path.to_path_buf()));
    }

    let mut seen = HashSet::new();
    for name in df.get_column_names() {
        if !seen.insert(name.to_string()) {
            return Err(DataError::DuplicateColumn(name.to_string()));
        }
    }

    Ok(df)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect()
}

/// Extracts one column as `f64`, rejecting nulls, non-numeric data and non-finite values.
pub fn numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };
    if matches!(series.dtype(), DataType::String) {
        return Err(wrong_type());
    }
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Extracts one column as text labels.
pub fn label_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let series = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let as_text = series.cast(&DataType::String)?;
    let labels = as_text
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|label| label.unwrap_or_default().to_string())
        .collect();
    Ok(labels)
}

/// Stacks the named columns into a `[rows, columns.len()]` matrix.
pub fn numeric_matrix<S: AsRef<str>>(
    df: &DataFrame,
    columns: &[S],
) -> Result<Array2<f64>, DataError> {
    let rows = df.height();
    let mut buffer = Vec::with_capacity(rows * columns.len());
    for name in columns {
        let mut column = numeric_column(df, name.as_ref())?;
        buffer.append(&mut column);
    }
    // Columns were appended one after another, i.e. column-major order.
    Array2::from_shape_vec((rows, columns.len()).f(), buffer).map_err(|e| {
        DataError::ColumnWrongType {
            column_name: "<matrix>".to_string(),
            expected_type: "rectangular numeric matrix",
            found_type: e.to_string(),
        }
    })
}

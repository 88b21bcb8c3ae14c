use ndarray::Array2;
use std::path::Path;

use crate::shared::tables::{self, DataError};

/// Column labels that mark the intercept term of the cohort design matrix.
pub const INTERCEPT_LABELS: [&str; 2] = ["intercept", "const"];

/// The precomputed least-squares left inverse of a cohort's feature design matrix.
///
/// `matrix` is `[features, subjects]`; row `i` belongs to `features[i]`. The subject
/// axis must follow the same order as the cohort's feature table.
#[derive(Debug, Clone)]
pub struct LeftInverse {
    features: Vec<String>,
    matrix: Array2<f64>,
}

impl LeftInverse {
    pub fn new(features: Vec<String>, matrix: Array2<f64>) -> Result<Self, DataError> {
        if features.len() != matrix.nrows() {
            return Err(DataError::ColumnWrongType {
                column_name: "<left inverse>".to_string(),
                expected_type: "one label per feature row",
                found_type: format!("{} labels for {} rows", features.len(), matrix.nrows()),
            });
        }
        Ok(Self { features, matrix })
    }

    /// Loads a left inverse stored subject-major: one column per feature (plus an
    /// optional intercept column) and one row per subject.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        log::info!("Loading left inverse from '{}'", path.display());
        let df = tables::read_table(path)?;
        let features = tables::column_names(&df);
        let subject_major = tables::numeric_matrix(&df, &features)?;
        let matrix = subject_major.reversed_axes().as_standard_layout().to_owned();
        log::info!(
            "Left inverse covers {} features and {} subjects",
            matrix.nrows(),
            matrix.ncols()
        );
        Self::new(features, matrix)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn n_subjects(&self) -> usize {
        self.matrix.ncols()
    }

    /// Index of the intercept row, if the design matrix had one.
    pub fn intercept_index(&self) -> Option<usize> {
        self.features
            .iter()
            .position(|f| INTERCEPT_LABELS.iter().any(|l| f.eq_ignore_ascii_case(l)))
    }
}

use ndarray::Array2;
use std::path::Path;

use crate::shared::tables::{self, DataError};
use crate::types::PropagationError;

/// Relative tolerance when checking symmetry of a stored covariance matrix.
const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Phenotypic covariance between cohort features, labelled on both axes.
#[derive(Debug, Clone)]
pub struct CovarianceMatrix {
    labels: Vec<String>,
    values: Array2<f64>,
}

impl CovarianceMatrix {
    pub fn new(labels: Vec<String>, values: Array2<f64>) -> Result<Self, PropagationError> {
        if !values.is_square() {
            return Err(PropagationError::InvalidCovariance(format!(
                "expected a square matrix, found {} rows and {} columns",
                values.nrows(),
                values.ncols()
            )));
        }
        if labels.len() != values.nrows() {
            return Err(PropagationError::InvalidCovariance(format!(
                "{} labels for a {}x{} matrix",
                labels.len(),
                values.nrows(),
                values.ncols()
            )));
        }
        let n = labels.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (values[[i, j]], values[[j, i]]);
                let scale = a.abs().max(b.abs()).max(1.0);
                if (a - b).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(PropagationError::InvalidCovariance(format!(
                        "entry ({}, {}) is {a} but ({}, {}) is {b}",
                        labels[i], labels[j], labels[j], labels[i]
                    )));
                }
            }
        }
        Ok(Self { labels, values })
    }

    /// Loads a labelled covariance table. The first column holds row labels, which
    /// must repeat the header's feature labels in the same order.
    pub fn load(path: &Path) -> Result<Self, PropagationError> {
        log::info!("Loading feature covariance from '{}'", path.display());
        let df = tables::read_table(path)?;
        let mut names = tables::column_names(&df);
        if names.is_empty() {
            return Err(PropagationError::InvalidCovariance("no columns".to_string()));
        }
        let label_header = names.remove(0);
        let row_labels = tables::label_column(&df, &label_header)?;
        if row_labels.len() != names.len() {
            return Err(PropagationError::InvalidCovariance(format!(
                "{} rows for {} feature columns",
                row_labels.len(),
                names.len()
            )));
        }
        for (row, (found, expected)) in row_labels.iter().zip(&names).enumerate() {
            if found != expected {
                return Err(DataError::InconsistentLabels {
                    row,
                    expected: expected.clone(),
                    found: found.clone(),
                }
                .into());
            }
        }
        let values = tables::numeric_matrix(&df, &names)?;
        Self::new(names, values)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn index_of(&self, feature: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == feature)
    }

    /// The covariance restricted to `features`, in the given order.
    pub fn submatrix<S: AsRef<str>>(&self, features: &[S]) -> Result<Array2<f64>, PropagationError> {
        let indices = features
            .iter()
            .map(|f| {
                self.index_of(f.as_ref())
                    .ok_or_else(|| PropagationError::MissingCovariance(f.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Array2::from_shape_fn((indices.len(), indices.len()), |(i, j)| {
            self.values[[indices[i], indices[j]]]
        }))
    }
}

/// Converts a covariance matrix to correlations. A feature without variance is
/// uncorrelated with everything else.
pub fn correlation(covariance: &Array2<f64>) -> Array2<f64> {
    let sd: Vec<f64> = covariance.diag().iter().map(|v| v.max(0.0).sqrt()).collect();
    Array2::from_shape_fn(covariance.dim(), |(i, j)| {
        if i == j {
            1.0
        } else if sd[i] == 0.0 || sd[j] == 0.0 {
            0.0
        } else {
            covariance[[i, j]] / (sd[i] * sd[j])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_labelled_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("covariance.tsv");
        fs::write(&path, "feature\tage\tbmi\nage\t100\t10\nbmi\t10\t25\n").unwrap();
        let covariance = CovarianceMatrix::load(&path).unwrap();
        assert_eq!(covariance.labels(), &["age", "bmi"]);
        assert_eq!(covariance.submatrix(&["bmi", "age"]).unwrap(), array![[25.0, 10.0], [10.0, 100.0]]);
        assert!(matches!(
            covariance.submatrix(&["height"]),
            Err(PropagationError::MissingCovariance(f)) if f == "height"
        ));
    }

    #[test]
    fn row_labels_must_follow_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("covariance.tsv");
        fs::write(&path, "feature\tage\tbmi\nbmi\t25\t10\nage\t10\t100\n").unwrap();
        assert!(matches!(
            CovarianceMatrix::load(&path),
            Err(PropagationError::Data(DataError::InconsistentLabels { row: 0, .. }))
        ));
    }

    #[test]
    fn asymmetric_and_non_square_are_invalid() {
        let labels = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            CovarianceMatrix::new(labels.clone(), array![[1.0, 0.5], [0.4, 1.0]]),
            Err(PropagationError::InvalidCovariance(_))
        ));
        assert!(matches!(
            CovarianceMatrix::new(labels, array![[1.0, 0.5, 0.0], [0.5, 1.0, 0.0]]),
            Err(PropagationError::InvalidCovariance(_))
        ));
    }

    #[test]
    fn correlation_scales_by_standard_deviations() {
        let r = correlation(&array![[4.0, 3.0, 0.0], [3.0, 9.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_abs_diff_eq!(r[[0, 1]], 0.5);
        assert_abs_diff_eq!(r[[1, 0]], 0.5);
        assert_eq!(r[[2, 2]], 1.0);
        assert_eq!(r[[0, 2]], 0.0);
    }
}

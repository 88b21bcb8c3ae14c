use ndarray::{Array1, ArrayView1};
use thiserror::Error;

use super::left_inverse::LeftInverse;
use crate::phenotype::FeatureTable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error(
        "The phenotype has {phenotype_len} values but the left inverse was built for {subjects} subjects."
    )]
    DimensionMismatch {
        phenotype_len: usize,
        subjects: usize,
    },
    #[error(
        "The coefficient for feature '{0}' is not finite. The phenotype likely overflowed or contains NaN."
    )]
    NonFiniteCoefficient(String),
}

/// Least-squares coefficients of a derived phenotype, one per cohort feature.
///
/// The intercept, when the design had one, is kept apart from the feature
/// coefficients: it has no GWAS of its own and does not take part in propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct BetaVector {
    features: Vec<String>,
    values: Vec<f64>,
    intercept: Option<f64>,
}

impl BetaVector {
    pub fn new(features: Vec<String>, values: Vec<f64>) -> Self {
        assert_eq!(features.len(), values.len(), "one coefficient per feature");
        Self {
            features,
            values,
            intercept: None,
        }
    }

    /// A vector selecting exactly one feature with coefficient `1.0`.
    pub fn indicator(features: &[String], selected: &str) -> Option<Self> {
        features.iter().position(|f| f == selected)?;
        let values = features
            .iter()
            .map(|f| if f == selected { 1.0 } else { 0.0 })
            .collect();
        Some(Self::new(features.to_vec(), values))
    }

    pub fn with_intercept(mut self, intercept: f64) -> Self {
        self.intercept = Some(intercept);
        self
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn intercept(&self) -> Option<f64> {
        self.intercept
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.features
            .iter()
            .position(|f| f == feature)
            .map(|index| self.values[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.features
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Features with a nonzero coefficient, in vector order.
    pub fn contributing(&self) -> impl Iterator<Item = (&str, f64)> {
        self.iter().filter(|(_, value)| *value != 0.0)
    }

    /// Applies `f` to every coefficient; the intercept is transformed too.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            features: self.features.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
            intercept: self.intercept.map(&f),
        }
    }
}

/// Projects a derived phenotype onto the cohort features: `beta = L · phenotype`.
pub fn project(
    phenotype: ArrayView1<'_, f64>,
    left_inverse: &LeftInverse,
) -> Result<BetaVector, ProjectionError> {
    if phenotype.len() != left_inverse.n_subjects() {
        return Err(ProjectionError::DimensionMismatch {
            phenotype_len: phenotype.len(),
            subjects: left_inverse.n_subjects(),
        });
    }

    let coefficients: Array1<f64> = left_inverse.matrix().dot(&phenotype);
    let intercept_index = left_inverse.intercept_index();

    let mut features = Vec::with_capacity(coefficients.len());
    let mut values = Vec::with_capacity(coefficients.len());
    let mut intercept = None;
    for (index, (name, &value)) in left_inverse
        .features()
        .iter()
        .zip(coefficients.iter())
        .enumerate()
    {
        if !value.is_finite() {
            return Err(ProjectionError::NonFiniteCoefficient(name.clone()));
        }
        if Some(index) == intercept_index {
            intercept = Some(value);
            continue;
        }
        features.push(name.clone());
        values.push(value);
    }

    let beta = BetaVector::new(features, values);
    Ok(match intercept {
        Some(value) => beta.with_intercept(value),
        None => beta,
    })
}

/// Coefficient of determination of the linear approximation `intercept + X·beta`
/// of `phenotype`.
///
/// Returns `None` when the table lacks one of the projected features, the lengths
/// disagree, or the phenotype is constant.
pub fn fit_quality(
    table: &FeatureTable,
    phenotype: ArrayView1<'_, f64>,
    beta: &BetaVector,
) -> Option<f64> {
    if phenotype.len() != table.n_subjects() || phenotype.is_empty() {
        return None;
    }

    let mut fitted = Array1::from_elem(phenotype.len(), beta.intercept().unwrap_or(0.0));
    for (feature, coefficient) in beta.contributing() {
        let column = table.column(feature)?;
        fitted.scaled_add(coefficient, &column);
    }

    let mean = phenotype.sum() / phenotype.len() as f64;
    let total: f64 = phenotype.iter().map(|y| (y - mean).powi(2)).sum();
    if total == 0.0 {
        return None;
    }
    let residual: f64 = phenotype
        .iter()
        .zip(fitted.iter())
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    Some(1.0 - residual / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn age_bmi_left_inverse() -> LeftInverse {
        // Inverse of [[40, 25], [50, 30]].
        LeftInverse::new(
            vec!["age".to_string(), "bmi".to_string()],
            array![[-0.6, 0.5], [1.0, -0.8]],
        )
        .unwrap()
    }

    #[test]
    fn sum_of_features_projects_to_unit_coefficients() {
        let beta = project(array![65.0, 80.0].view(), &age_bmi_left_inverse()).unwrap();
        assert_eq!(beta.features(), &["age", "bmi"]);
        assert_abs_diff_eq!(beta.values()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(beta.values()[1], 1.0, epsilon = 1e-12);
        assert_eq!(beta.intercept(), None);
    }

    #[test]
    fn projection_is_linear() {
        let left_inverse = LeftInverse::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            Array2::from_shape_fn((3, 5), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 10.0 - 0.4),
        )
        .unwrap();
        let p1 = array![1.0, -2.0, 0.5, 3.0, 4.5];
        let p2 = array![0.25, 9.0, -1.0, 2.0, -3.0];
        let (a, b) = (2.5, -0.75);

        let combined = project((&p1 * a + &p2 * b).view(), &left_inverse).unwrap();
        let beta1 = project(p1.view(), &left_inverse).unwrap();
        let beta2 = project(p2.view(), &left_inverse).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(
                combined.values()[i],
                a * beta1.values()[i] + b * beta2.values()[i],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = project(array![1.0, 2.0, 3.0].view(), &age_bmi_left_inverse()).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::DimensionMismatch {
                phenotype_len: 3,
                subjects: 2
            }
        );
    }

    #[test]
    fn intercept_row_is_split_off() {
        let left_inverse = LeftInverse::new(
            vec!["const".to_string(), "x".to_string()],
            array![[0.5, 0.5], [-1.0, 1.0]],
        )
        .unwrap();
        let beta = project(array![3.0, 5.0].view(), &left_inverse).unwrap();
        assert_eq!(beta.features(), &["x"]);
        assert_eq!(beta.values(), &[2.0]);
        assert_eq!(beta.intercept(), Some(4.0));
        assert_eq!(beta.get("const"), None);
    }

    #[test]
    fn perfect_fit_has_unit_r_squared() {
        let table = FeatureTable::new(
            vec!["age".to_string(), "bmi".to_string()],
            array![[40.0, 25.0], [50.0, 30.0]],
        )
        .unwrap();
        let phenotype = array![65.0, 80.0];
        let beta = project(phenotype.view(), &age_bmi_left_inverse()).unwrap();
        let r2 = fit_quality(&table, phenotype.view(), &beta).unwrap();
        assert_abs_diff_eq!(r2, 1.0, epsilon = 1e-9);

        assert_eq!(fit_quality(&table, array![1.0, 1.0].view(), &beta), None);
        let foreign = BetaVector::new(vec!["height".to_string()], vec![1.0]);
        assert_eq!(fit_quality(&table, phenotype.view(), &foreign), None);
    }

    #[test]
    fn indicator_selects_one_feature() {
        let features = vec!["a".to_string(), "b".to_string()];
        let beta = BetaVector::indicator(&features, "b").unwrap();
        assert_eq!(beta.values(), &[0.0, 1.0]);
        assert_eq!(beta.contributing().collect::<Vec<_>>(), vec![("b", 1.0)]);
        assert!(BetaVector::indicator(&features, "c").is_none());
    }
}

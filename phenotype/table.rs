use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use std::path::Path;

use super::program::{BoundProgram, EvalError, Program};
use crate::shared::tables::{self, DataError};

/// Subjects by named features. Rows follow the cohort's subject order, which is also
/// the column order of the cohort's left-inverse matrix.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureTable {
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Result<Self, DataError> {
        if names.len() != values.ncols() {
            return Err(DataError::ColumnWrongType {
                column_name: "<header>".to_string(),
                expected_type: "one name per feature column",
                found_type: format!("{} names for {} columns", names.len(), values.ncols()),
            });
        }
        let mut seen = ahash::AHashSet::with_capacity(names.len());
        if let Some(duplicate) = names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(DataError::DuplicateColumn(duplicate.clone()));
        }
        Ok(Self { names, values })
    }

    /// Loads a feature table, one column per feature and one row per subject.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        log::info!("Loading feature table from '{}'", path.display());
        let df = tables::read_table(path)?;
        let names = tables::column_names(&df);
        let values = tables::numeric_matrix(&df, &names)?;
        log::info!(
            "Loaded {} subjects with {} features",
            values.nrows(),
            values.ncols()
        );
        Self::new(names, values)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_subjects(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name)
            .map(|index| self.values.column(index))
    }

    /// Resolves the program's feature references against this table's columns.
    pub fn bind(&self, program: &Program) -> Result<BoundProgram, EvalError> {
        program.bind(&self.names)
    }
}

impl BoundProgram {
    /// Lazily evaluates the program subject by subject, in table order.
    pub fn evaluate_rows<'a>(
        &'a self,
        table: &'a FeatureTable,
    ) -> impl Iterator<Item = Result<f64, EvalError>> + 'a {
        let mut scratch = self.scratch();
        let mut row = Vec::with_capacity(table.n_features());
        table
            .values
            .axis_iter(Axis(0))
            .enumerate()
            .map(move |(index, values)| {
                row.clear();
                row.extend(values.iter().copied());
                self.evaluate_row(&row, index, &mut scratch)
            })
    }
}

/// Evaluates the definition for every subject of `table`.
///
/// Rows are independent, so they are evaluated in parallel; the result keeps the
/// table's subject order and matches [`BoundProgram::evaluate_rows`] exactly.
pub fn apply_definition(program: &Program, table: &FeatureTable) -> Result<Array1<f64>, EvalError> {
    let bound = table.bind(program)?;
    let values = table
        .values
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map_init(
            || (bound.scratch(), Vec::with_capacity(table.n_features())),
            |(scratch, row), (index, values)| {
                row.clear();
                row.extend(values.iter().copied());
                bound.evaluate_row(row, index, scratch)
            },
        )
        .collect::<Result<Vec<f64>, EvalError>>()?;
    Ok(Array1::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::parse;
    use ndarray::array;
    use std::io::Write;
    use tempfile::Builder;

    fn age_bmi_table() -> FeatureTable {
        FeatureTable::new(
            vec!["age".to_string(), "bmi".to_string()],
            array![[40.0, 25.0], [50.0, 30.0]],
        )
        .unwrap()
    }

    #[test]
    fn sum_of_two_features() {
        let table = age_bmi_table();
        let program = parse("age bmi +").unwrap();
        let phenotype = apply_definition(&program, &table).unwrap();
        assert_eq!(phenotype, array![65.0, 80.0]);
    }

    #[test]
    fn lazy_rows_match_whole_vector() {
        let table = age_bmi_table();
        let program = parse("bmi 27 > age *").unwrap();
        let bound = table.bind(&program).unwrap();
        let lazy: Vec<f64> = bound
            .evaluate_rows(&table)
            .collect::<Result<_, _>>()
            .unwrap();
        let whole = apply_definition(&program, &table).unwrap();
        assert_eq!(lazy, whole.to_vec());
        assert_eq!(lazy, vec![0.0, 50.0]);
    }

    #[test]
    fn unknown_feature_fails_before_evaluation() {
        let table = age_bmi_table();
        let program = parse("age height +").unwrap();
        assert_eq!(
            apply_definition(&program, &table).unwrap_err(),
            EvalError::UnknownFeature("height".to_string())
        );
    }

    #[test]
    fn division_by_zero_names_the_row() {
        let table = FeatureTable::new(
            vec!["a".to_string(), "b".to_string()],
            array![[1.0, 2.0], [1.0, 0.0], [3.0, 1.0]],
        )
        .unwrap();
        let program = parse("a b /").unwrap();
        assert_eq!(
            apply_definition(&program, &table).unwrap_err(),
            EvalError::DivisionByZero { row: Some(1) }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = FeatureTable::new(
            vec!["a".to_string(), "a".to_string()],
            array![[1.0, 2.0]],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::DuplicateColumn(name) if name == "a"));
    }

    #[test]
    fn loads_from_tsv() {
        let mut file = Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "age\tbmi\tsmoker\n40\t25.5\t0\n50\t30\t1").unwrap();
        file.flush().unwrap();

        let table = FeatureTable::load(file.path()).unwrap();
        assert_eq!(table.names(), &["age", "bmi", "smoker"]);
        assert_eq!(table.n_subjects(), 2);
        assert_eq!(table.column("bmi").unwrap().to_vec(), vec![25.5, 30.0]);
        assert!(table.column("height").is_none());
    }
}

//! Access to stored cohort data: the feature table, the precomputed left inverse,
//! the feature covariance and the per-feature GWAS files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::phenotype::FeatureTable;
use crate::project::LeftInverse;
use crate::shared::files::list_data_files;
use crate::shared::tables::DataError;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Cohort '{0}' does not exist.")]
    UnknownCohort(String),
    #[error("Cohort '{cohort}' is missing '{}'.", .path.display())]
    MissingCohortFile { cohort: String, path: PathBuf },
    #[error("Failed to read cohort '{cohort}': {source}")]
    Data { cohort: String, source: DataError },
    #[error("Failed to parse cohort metadata: {0}")]
    Metadata(#[from] toml::de::Error),
    #[error("Failed to serialize cohort metadata: {0}")]
    MetadataWrite(#[from] toml::ser::Error),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload rejected: {0}")]
    Upload(String),
}

/// Cohort metadata kept in `cohort.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortInfo {
    pub name: String,
    /// Covariates included in every per-feature GWAS.
    #[serde(default)]
    pub num_covar: usize,
}

/// The data collaborator of the pipeline.
pub trait CohortStore {
    /// The feature table, the covariance matrix location and every GWAS file.
    fn feature_table_and_gwas_paths(
        &self,
        cohort: &str,
    ) -> Result<(FeatureTable, PathBuf, Vec<PathBuf>), CollaboratorError>;

    /// The stored left inverse, or `None` when the cohort has none.
    fn left_inverse(&self, cohort: &str) -> Result<Option<LeftInverse>, CollaboratorError>;

    fn cohort_info(&self, cohort: &str) -> Result<CohortInfo, CollaboratorError>;
}

/// Cohorts laid out on disk as
///
/// ```text
/// <root>/cohorts/<name>/cohort.toml
///                      /phenotypes.tsv
///                      /left_inverse.tsv
///                      /covariance.tsv
///                      /gwas/<feature>.tsv[.gz]
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryCohortStore {
    root: PathBuf,
}

impl DirectoryCohortStore {
    pub const METADATA_FILE: &'static str = "cohort.toml";
    pub const FEATURE_TABLE_FILE: &'static str = "phenotypes.tsv";
    pub const LEFT_INVERSE_FILE: &'static str = "left_inverse.tsv";
    pub const COVARIANCE_FILE: &'static str = "covariance.tsv";
    pub const GWAS_DIR: &'static str = "gwas";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn cohort_dir(&self, cohort: &str) -> Result<PathBuf, CollaboratorError> {
        let valid_name = !cohort.is_empty()
            && cohort
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let dir = self.root.join("cohorts").join(cohort);
        if !valid_name || !dir.is_dir() {
            return Err(CollaboratorError::UnknownCohort(cohort.to_string()));
        }
        Ok(dir)
    }

    fn required(&self, cohort: &str, name: &str) -> Result<PathBuf, CollaboratorError> {
        let path = self.cohort_dir(cohort)?.join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(CollaboratorError::MissingCohortFile {
                cohort: cohort.to_string(),
                path,
            })
        }
    }

    fn data_error(cohort: &str) -> impl FnOnce(DataError) -> CollaboratorError + '_ {
        move |source| CollaboratorError::Data {
            cohort: cohort.to_string(),
            source,
        }
    }
}

impl CohortStore for DirectoryCohortStore {
    fn feature_table_and_gwas_paths(
        &self,
        cohort: &str,
    ) -> Result<(FeatureTable, PathBuf, Vec<PathBuf>), CollaboratorError> {
        let table_path = self.required(cohort, Self::FEATURE_TABLE_FILE)?;
        let table = FeatureTable::load(&table_path).map_err(Self::data_error(cohort))?;
        let covariance_path = self.required(cohort, Self::COVARIANCE_FILE)?;
        let gwas_paths = list_data_files(&self.required(cohort, Self::GWAS_DIR)?)?;
        log::info!(
            "Cohort '{cohort}': {} subjects, {} features, {} GWAS files",
            table.n_subjects(),
            table.n_features(),
            gwas_paths.len()
        );
        Ok((table, covariance_path, gwas_paths))
    }

    fn left_inverse(&self, cohort: &str) -> Result<Option<LeftInverse>, CollaboratorError> {
        let path = self.cohort_dir(cohort)?.join(Self::LEFT_INVERSE_FILE);
        if !path.exists() {
            log::warn!("Cohort '{cohort}' has no stored left inverse");
            return Ok(None);
        }
        LeftInverse::load(&path)
            .map(Some)
            .map_err(Self::data_error(cohort))
    }

    fn cohort_info(&self, cohort: &str) -> Result<CohortInfo, CollaboratorError> {
        let path = self.required(cohort, Self::METADATA_FILE)?;
        Ok(toml::from_str(&fs::read_to_string(&path)?)?)
    }
}

/// Creates `dir` if needed and writes its `cohort.toml`.
pub fn write_cohort_info(dir: &Path, info: &CohortInfo) -> Result<(), CollaboratorError> {
    let text = toml::to_string_pretty(info)?;
    fs::create_dir_all(dir)?;
    fs::write(dir.join(DirectoryCohortStore::METADATA_FILE), text)?;
    Ok(())
}

//! Shared types of the summary-statistic propagator: per-variant statistics, the
//! options that control a propagation run, and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::shared::tables::DataError;

// ========================================================================================
//                                   Statistic records
// ========================================================================================

/// Association statistics of one phenotype at one variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VariantStat {
    pub effect: f64,
    pub se: f64,
    pub sample_size: u64,
}

/// Names of the statistic columns in per-feature and derived files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatColumns {
    pub id: String,
    pub beta: String,
    pub se: String,
    pub sample_size: String,
}

impl Default for StatColumns {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            beta: "BETA".to_string(),
            se: "SE".to_string(),
            sample_size: "OBS_CT".to_string(),
        }
    }
}

// ========================================================================================
//                                   Run configuration
// ========================================================================================

/// How the derived sample size at a variant is aggregated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleSizePolicy {
    /// Minimum over features with a nonzero coefficient.
    #[default]
    ContributingMinimum,
    /// Minimum over every feature file supplied to the run.
    GlobalMinimum,
}

/// Which standard-error model combines the per-feature statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarianceModelKind {
    #[default]
    CorrelatedDelta,
    GenotypePartialVariance,
}

impl fmt::Display for VarianceModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CorrelatedDelta => "correlated-delta",
            Self::GenotypePartialVariance => "genotype-partial-variance",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropagationOptions {
    /// Variants read from every file per unit of work.
    pub chunk_size: usize,
    pub num_threads: usize,
    /// Chunks that may be queued between the reader and the workers.
    pub capacity: usize,
    pub compress: bool,
    pub quiet: bool,
    pub columns: StatColumns,
    pub sample_size: SampleSizePolicy,
    pub variance_model: VarianceModelKind,
    /// Covariates regressed out of every per-feature GWAS.
    pub num_covar: usize,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            num_threads: num_cpus::get().max(1),
            capacity: 8,
            compress: false,
            quiet: false,
            columns: StatColumns::default(),
            sample_size: SampleSizePolicy::default(),
            variance_model: VarianceModelKind::default(),
            num_covar: 0,
        }
    }
}

// ========================================================================================
//                                        Errors
// ========================================================================================

#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("The covariance matrix has no entry for feature '{0}'.")]
    MissingCovariance(String),
    #[error("No GWAS summary statistics were provided for feature '{0}', which has a nonzero coefficient.")]
    MissingFeatureStats(String),
    #[error("Every coefficient is zero; the phenotype has no genetic component to propagate.")]
    NoContributingFeatures,
    #[error(
        "Variant {index} is '{found}' in '{}' but '{expected}' in the first file. Statistic files must list the same variants in the same order.",
        .path.display()
    )]
    MisalignedVariants {
        index: u64,
        expected: String,
        found: String,
        path: PathBuf,
    },
    #[error(
        "'{}' ended after {variants} variants while other statistic files continue.",
        .path.display()
    )]
    TruncatedStats { path: PathBuf, variants: u64 },
    #[error(
        "Line {line} of '{}': column '{column}' holds '{value}', which is not a valid number.",
        .path.display()
    )]
    MalformedRecord {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },
    #[error("The required column '{column}' was not found in '{}'.", .path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("Invalid covariance matrix: {0}")]
    InvalidCovariance(String),
    #[error(
        "A sample size of {sample_size} leaves no degrees of freedom after {num_covar} covariates."
    )]
    InsufficientDegreesOfFreedom { sample_size: u64, num_covar: usize },
    #[error("Failed to load the covariance matrix: {0}")]
    Data(#[from] DataError),
    #[error("I/O error while propagating statistics: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error in '{}': {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("A propagation thread failed: {0}")]
    Worker(String),
}

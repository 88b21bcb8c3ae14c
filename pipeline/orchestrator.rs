use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::cohort::{CohortStore, CollaboratorError, DirectoryCohortStore};
use super::config::{ConfigError, Settings};
use super::metadata::RequestMetadata;
use super::storage::{LocalObjectStore, ObjectStore};
use super::workspace::{Workspace, validate_request_id};
use crate::covariance::CovarianceMatrix;
use crate::phenotype::{EvalError, ParseError, apply_definition, parse};
use crate::progress::observer_for;
use crate::project::{
    BetaFileError, BetaVector, ProjectionError, fit_quality, project, read_beta_file,
    write_beta_file,
};
use crate::propagate::{FeatureSource, propagate_to_file};
use crate::types::PropagationError;

// ========================================================================================
//                                   State machine
// ========================================================================================

/// The stages of a request, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    ComputePhenotype,
    ComputeBeta,
    ProjectStats,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse",
            Self::ComputePhenotype => "compute_phenotype",
            Self::ComputeBeta => "compute_beta",
            Self::ProjectStats => "project_stats",
            Self::Upload => "upload",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Parsed,
    PhenotypeComputed,
    BetaComputed,
    StatsProjected,
    Uploaded,
    Done,
    Failed { stage: Stage, cause: String },
}

impl PipelineState {
    fn successor(&self) -> Option<Self> {
        Some(match self {
            Self::Pending => Self::Parsed,
            Self::Parsed => Self::PhenotypeComputed,
            Self::PhenotypeComputed => Self::BetaComputed,
            Self::BetaComputed => Self::StatsProjected,
            Self::StatsProjected => Self::Uploaded,
            Self::Uploaded => Self::Done,
            Self::Done | Self::Failed { .. } => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Moves to `next`, which must be the immediate successor or a failure.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        let legal = match &next {
            Self::Failed { .. } => !self.is_terminal(),
            _ => self.successor().as_ref() == Some(&next),
        };
        if !legal {
            return Err(PipelineError::IllegalTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            });
        }
        log::debug!("Pipeline state {self:?} -> {next:?}");
        *self = next;
        Ok(())
    }
}

// ========================================================================================
//                                   Errors & results
// ========================================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),
    #[error("Invalid phenotype definition: {0}")]
    Parse(#[from] ParseError),
    #[error("Failed to evaluate the phenotype definition: {0}")]
    Eval(#[from] EvalError),
    #[error(
        "Cohort '{0}' has no stored left inverse, so the phenotype cannot be projected onto its features."
    )]
    MissingLeftInverse(String),
    #[error("Failed to project the phenotype: {0}")]
    Projection(#[from] ProjectionError),
    #[error("Failed to write or read the beta file: {0}")]
    BetaFile(#[from] BetaFileError),
    #[error("Failed to propagate summary statistics: {0}")]
    Propagation(#[from] PropagationError),
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("Failed to prepare the request workspace: {0}")]
    Workspace(std::io::Error),
    #[error("Invalid service settings: {0}")]
    Config(#[from] ConfigError),
    #[error("Illegal pipeline transition from {from} to {to}.")]
    IllegalTransition { from: String, to: String },
}

impl PipelineError {
    /// 400 for errors in the caller's request, 500 for everything else.
    pub fn http_status_hint(&self) -> u16 {
        match self {
            Self::InvalidRequestId(_) | Self::Parse(_) => 400,
            _ => 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Done,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineResult {
    pub request_id: String,
    /// Absent on dry runs.
    pub url: Option<String>,
    /// Location of the provenance record uploaded beside the result.
    pub metadata_url: Option<String>,
    pub status: PipelineStatus,
    pub rsquared: Option<f64>,
    pub num_variants: u64,
}

#[derive(Error, Clone, Debug, PartialEq, Serialize)]
#[error("Request '{request_id}' failed at stage {stage}: {message}")]
pub struct PipelineFailure {
    pub request_id: String,
    pub stage: Stage,
    pub http_status_hint: u16,
    pub message: String,
}

impl PipelineFailure {
    fn new(request_id: &str, stage: Stage, error: &PipelineError) -> Self {
        Self {
            request_id: request_id.to_string(),
            stage,
            http_status_hint: error.http_status_hint(),
            message: error.to_string(),
        }
    }
}

// ========================================================================================
//                                   Orchestration
// ========================================================================================

/// Runs requests against a data and an object-storage collaborator.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    cohorts: &'a dyn CohortStore,
    storage: &'a dyn ObjectStore,
}

type Staged<T> = Result<T, (Stage, PipelineError)>;

fn at<E: Into<PipelineError>>(stage: Stage) -> impl FnOnce(E) -> (Stage, PipelineError) {
    move |error| (stage, error.into())
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        cohorts: &'a dyn CohortStore,
        storage: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            settings,
            cohorts,
            storage,
        }
    }

    /// Computes the derived GWAS of `definition` over `cohort`.
    pub fn run(
        &self,
        request_id: &str,
        definition: &str,
        cohort: &str,
    ) -> Result<PipelineResult, PipelineFailure> {
        let mut state = PipelineState::Pending;
        match self.execute(request_id, definition, cohort, &mut state) {
            Ok(result) => {
                log::info!(
                    "Request '{request_id}' done: {} variants, R² {:?}",
                    result.num_variants,
                    result.rsquared
                );
                Ok(result)
            }
            Err((stage, error)) => {
                let failure = PipelineFailure::new(request_id, stage, &error);
                log::error!("{failure}");
                // Failed is reachable from every non-terminal state.
                let _ = state.advance(PipelineState::Failed {
                    stage,
                    cause: failure.message.clone(),
                });
                Err(failure)
            }
        }
    }

    fn execute(
        &self,
        request_id: &str,
        definition: &str,
        cohort: &str,
        state: &mut PipelineState,
    ) -> Staged<PipelineResult> {
        let gwas = &self.settings.indirect_gwas;
        let storage = &self.settings.storage;

        // --- Parse ---
        self.settings.validate().map_err(at(Stage::Parse))?;
        validate_request_id(request_id)
            .map_err(|reason| (Stage::Parse, PipelineError::InvalidRequestId(reason)))?;
        let program = parse(definition).map_err(at(Stage::Parse))?;
        log::info!("Request '{request_id}': phenotype {program}");
        state.advance(PipelineState::Parsed).map_err(at(Stage::Parse))?;

        // --- Compute phenotype ---
        let workspace = Workspace::create(storage.temp_root.as_deref(), request_id)
            .map_err(|e| (Stage::ComputePhenotype, PipelineError::Workspace(e)))?;
        let (table, covariance_path, gwas_paths) = self
            .cohorts
            .feature_table_and_gwas_paths(cohort)
            .map_err(at(Stage::ComputePhenotype))?;
        let phenotype =
            apply_definition(&program, &table).map_err(at(Stage::ComputePhenotype))?;
        state
            .advance(PipelineState::PhenotypeComputed)
            .map_err(at(Stage::ComputePhenotype))?;

        // --- Compute beta ---
        let left_inverse = self
            .cohorts
            .left_inverse(cohort)
            .map_err(at(Stage::ComputeBeta))?
            .ok_or_else(|| {
                (
                    Stage::ComputeBeta,
                    PipelineError::MissingLeftInverse(cohort.to_string()),
                )
            })?;
        let single = program
            .as_single_feature()
            .and_then(|feature| BetaVector::indicator(left_inverse.features(), feature));
        let beta = match single {
            Some(indicator) => indicator,
            None => project(phenotype.view(), &left_inverse)
                .map_err(at(Stage::ComputeBeta))?,
        };
        let rsquared = fit_quality(&table, phenotype.view(), &beta);
        match rsquared {
            Some(r2) => log::info!("Linear approximation of the phenotype has R² = {r2:.4}"),
            None => log::warn!("R² of the linear approximation is undefined for this phenotype"),
        }
        let beta_path = workspace.beta_path();
        write_beta_file(&beta_path, request_id, &beta, gwas.beta_decimals)
            .map_err(at(Stage::ComputeBeta))?;
        let (_, beta) = read_beta_file(&beta_path).map_err(at(Stage::ComputeBeta))?;
        state
            .advance(PipelineState::BetaComputed)
            .map_err(at(Stage::ComputeBeta))?;

        // --- Project summary statistics ---
        let info = self
            .cohorts
            .cohort_info(cohort)
            .map_err(at(Stage::ProjectStats))?;
        let covariance =
            CovarianceMatrix::load(&covariance_path).map_err(at(Stage::ProjectStats))?;
        let sources: Vec<FeatureSource> = gwas_paths
            .iter()
            .filter_map(|path| FeatureSource::from_path(path))
            .collect();
        let options = gwas.propagation_options(info.num_covar);
        let extension = gwas.output_extension();
        let output = workspace.output_path(extension);
        let mut observer = observer_for(options.quiet);
        let summary = propagate_to_file(
            &beta,
            &covariance,
            &sources,
            &options,
            &output,
            observer.as_mut(),
        )
        .map_err(at(Stage::ProjectStats))?;
        state
            .advance(PipelineState::StatsProjected)
            .map_err(at(Stage::ProjectStats))?;

        // --- Upload ---
        let metadata_path = workspace.metadata_path();
        RequestMetadata {
            request_id: request_id.to_string(),
            phenotype_definition: program.to_string(),
            cohort: cohort.to_string(),
            num_subjects: table.n_subjects(),
        }
        .save(&metadata_path)
        .map_err(at(Stage::Upload))?;

        let (url, metadata_url) = if storage.dry_run {
            log::info!("Dry run: skipping upload of '{}'", output.display());
            (None, None)
        } else {
            let upload = |local: &std::path::Path, key: String| {
                self.storage.upload(local, &key)?;
                self.storage.presigned_url(&key)
            };
            let prefix = &storage.result_prefix;
            let url = upload(&output, format!("{prefix}/{request_id}.{extension}"))
                .map_err(at(Stage::Upload))?;
            let metadata_url =
                upload(&metadata_path, format!("{prefix}/{request_id}.metadata.toml"))
                    .map_err(at(Stage::Upload))?;
            (Some(url), Some(metadata_url))
        };
        state
            .advance(PipelineState::Uploaded)
            .map_err(at(Stage::Upload))?;
        state
            .advance(PipelineState::Done)
            .map_err(at(Stage::Upload))?;

        if let Err(e) = workspace.close() {
            log::warn!("Failed to remove the workspace of '{request_id}': {e}");
        }
        Ok(PipelineResult {
            request_id: request_id.to_string(),
            url,
            metadata_url,
            status: PipelineStatus::Done,
            rsquared,
            num_variants: summary.num_variants,
        })
    }
}

/// Runs one request against the on-disk cohort store and local object storage
/// configured in `settings`.
pub fn run_pipeline(
    settings: &Settings,
    request_id: &str,
    definition: &str,
    cohort: &str,
) -> Result<PipelineResult, PipelineFailure> {
    let cohorts = DirectoryCohortStore::new(&settings.storage.data_root);
    let storage = LocalObjectStore::new(
        &settings.storage.results_root,
        Duration::from_secs(settings.storage.url_expiry_secs),
    );
    Pipeline::new(settings, &cohorts, &storage).run(request_id, definition, cohort)
}

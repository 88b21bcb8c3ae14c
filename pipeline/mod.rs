//! # Request Pipeline
//!
//! One request runs parse → phenotype → beta → statistics → upload. Each stage
//! consumes the previous stage's artifact; a failure stops the request at that stage
//! and is reported as a [`PipelineFailure`]. Intermediate files live in a per-request
//! [`Workspace`] that is removed on every exit path.

pub mod cohort;
pub mod config;
pub mod metadata;
pub mod orchestrator;
pub mod storage;
pub mod workspace;

pub use cohort::{CohortInfo, CohortStore, CollaboratorError, DirectoryCohortStore};
pub use config::{ConfigError, IndirectGwasSettings, Settings, StorageSettings};
pub use metadata::RequestMetadata;
pub use orchestrator::{
    Pipeline, PipelineError, PipelineFailure, PipelineResult, PipelineState, PipelineStatus,
    Stage, run_pipeline,
};
pub use storage::{LocalObjectStore, ObjectStore};
pub use workspace::{Workspace, generate_request_id, validate_request_id};

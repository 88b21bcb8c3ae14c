#![deny(unused_variables)]
//! Indirect GWAS for derived phenotypes.
//!
//! A phenotype defined as an expression over cohort features is approximated by a
//! linear combination of those features, and its GWAS summary statistics are derived
//! from the stored per-feature GWAS instead of rerunning association testing.

pub mod covariance;
pub mod progress;
pub mod propagate;
pub mod reader;
pub mod types;
pub mod variance;
pub mod writer;

#[path = "../phenotype/mod.rs"]
pub mod phenotype;

#[path = "../project/mod.rs"]
pub mod project;

#[path = "../pipeline/mod.rs"]
pub mod pipeline;

#[path = "../shared/mod.rs"]
pub mod shared;

pub use pipeline::{PipelineFailure, PipelineResult, run_pipeline};

//! # Least-Squares Projection
//!
//! A derived phenotype is approximated as a linear combination of cohort features.
//! The cohort ships the left inverse `L` of its feature design matrix, so the
//! coefficients are a single matrix-vector product, `beta = L · phenotype`.

pub mod beta_file;
pub mod left_inverse;
pub mod regression;

pub use beta_file::{BetaFileError, DEFAULT_DECIMALS, read_beta_file, round_to, write_beta_file};
pub use left_inverse::LeftInverse;
pub use regression::{BetaVector, ProjectionError, fit_quality, project};

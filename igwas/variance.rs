//! # Standard-Error Models
//!
//! The derived effect at a variant is exact, `effect_Y = Σ beta_i · effect_i`. Its
//! standard error depends on how the per-feature estimates covary, which is a
//! modelling choice. A [`VarianceModel`] is built once per run from the coefficients
//! and the feature covariance, then evaluated for every variant.

use ndarray::{Array1, Array2};

use crate::covariance::{CovarianceMatrix, correlation};
use crate::types::{PropagationError, VarianceModelKind, VariantStat};

/// Per-variant standard error of a linear combination of feature GWAS estimates.
///
/// `stats` holds the contributing features' statistics in the same order as the
/// coefficients the model was built with.
pub trait VarianceModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn standard_error(
        &self,
        stats: &[VariantStat],
        effect: f64,
        sample_size: u64,
    ) -> Result<f64, PropagationError>;
}

impl VarianceModelKind {
    /// Builds the model for the contributing `features` and their coefficients.
    pub fn build<S: AsRef<str>>(
        self,
        features: &[S],
        beta: &[f64],
        covariance: &CovarianceMatrix,
        num_covar: usize,
    ) -> Result<Box<dyn VarianceModel>, PropagationError> {
        let sub = covariance.submatrix(features)?;
        let beta = Array1::from_vec(beta.to_vec());
        Ok(match self {
            Self::CorrelatedDelta => Box::new(CorrelatedDelta::new(beta, &sub)),
            Self::GenotypePartialVariance => {
                Box::new(GenotypePartialVariance::new(beta, sub, num_covar))
            }
        })
    }
}

// ========================================================================================
//                          Delta method with sample overlap
// ========================================================================================

/// `se_Y² = Σ_i Σ_j beta_i · beta_j · se_i · se_j · r_ij · o_ij`
///
/// `r_ij` is the phenotypic correlation of the two features and
/// `o_ij = min(n_i, n_j) / sqrt(n_i · n_j)` the fraction of shared samples.
pub struct CorrelatedDelta {
    beta: Array1<f64>,
    correlation: Array2<f64>,
}

impl CorrelatedDelta {
    pub fn new(beta: Array1<f64>, covariance: &Array2<f64>) -> Self {
        Self {
            beta,
            correlation: correlation(covariance),
        }
    }
}

fn overlap(n_i: u64, n_j: u64) -> f64 {
    if n_i == 0 || n_j == 0 {
        return 0.0;
    }
    n_i.min(n_j) as f64 / ((n_i as f64) * (n_j as f64)).sqrt()
}

impl VarianceModel for CorrelatedDelta {
    fn name(&self) -> &'static str {
        "correlated-delta"
    }

    fn standard_error(
        &self,
        stats: &[VariantStat],
        _effect: f64,
        _sample_size: u64,
    ) -> Result<f64, PropagationError> {
        let mut variance = 0.0;
        for (i, si) in stats.iter().enumerate() {
            let wi = self.beta[i] * si.se;
            variance += wi * wi;
            for (j, sj) in stats.iter().enumerate().skip(i + 1) {
                let wj = self.beta[j] * sj.se;
                variance += 2.0
                    * wi
                    * wj
                    * self.correlation[[i, j]]
                    * overlap(si.sample_size, sj.sample_size);
            }
        }
        // Rounding in a near-singular correlation can dip just below zero.
        Ok(variance.max(0.0).sqrt())
    }
}

// ========================================================================================
//                          Genotype partial variance model
// ========================================================================================

/// Reconstructs the derived standard error from the variance of the genotype after
/// covariate adjustment.
///
/// Each feature's GWAS implies `g_i = C_ii / (se_i² · dof_i + effect_i²)`, with
/// `dof_i = n_i − num_covar − 2`. The median over contributing features estimates
/// `g`, and `se_Y² = (betaᵗ C beta / g − effect_Y²) / dof_Y`.
pub struct GenotypePartialVariance {
    diagonal: Vec<f64>,
    projected_variance: f64,
    num_covar: usize,
}

impl GenotypePartialVariance {
    pub fn new(beta: Array1<f64>, covariance: Array2<f64>, num_covar: usize) -> Self {
        let projected_variance = beta.dot(&covariance.dot(&beta));
        Self {
            diagonal: covariance.diag().to_vec(),
            projected_variance,
            num_covar,
        }
    }

    fn degrees_of_freedom(&self, sample_size: u64) -> Result<f64, PropagationError> {
        let dof = sample_size as f64 - self.num_covar as f64 - 2.0;
        if dof > 0.0 {
            Ok(dof)
        } else {
            Err(PropagationError::InsufficientDegreesOfFreedom {
                sample_size,
                num_covar: self.num_covar,
            })
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl VarianceModel for GenotypePartialVariance {
    fn name(&self) -> &'static str {
        "genotype-partial-variance"
    }

    fn standard_error(
        &self,
        stats: &[VariantStat],
        effect: f64,
        sample_size: u64,
    ) -> Result<f64, PropagationError> {
        let mut partial = Vec::with_capacity(stats.len());
        for (stat, &variance) in stats.iter().zip(&self.diagonal) {
            let dof = self.degrees_of_freedom(stat.sample_size)?;
            partial.push(variance / (stat.se * stat.se * dof + stat.effect * stat.effect));
        }
        let genotype_variance = median(&mut partial);
        let dof = self.degrees_of_freedom(sample_size)?;
        let residual = self.projected_variance / genotype_variance - effect * effect;
        Ok((residual / dof).max(0.0).sqrt())
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::project::DEFAULT_DECIMALS;
use crate::types::{PropagationOptions, SampleSizePolicy, StatColumns, VarianceModelKind};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write settings file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML settings file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize settings to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Service settings, read from a TOML file. Every key is optional.
///
/// ```toml
/// [indirect_gwas]
/// chunk_size = 100000
/// compress = true
/// variance_model = "correlated-delta"
///
/// [storage]
/// data_root = "/srv/igwas/data"
/// dry_run = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub indirect_gwas: IndirectGwasSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndirectGwasSettings {
    pub chunk_size: usize,
    /// Worker threads; all logical CPUs when absent.
    pub num_threads: Option<usize>,
    pub capacity: usize,
    pub compress: bool,
    pub quiet: bool,
    pub variance_model: VarianceModelKind,
    pub sample_size: SampleSizePolicy,
    pub beta_decimals: u32,
    pub columns: StatColumns,
}

impl Default for IndirectGwasSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            num_threads: None,
            capacity: 8,
            compress: true,
            quiet: true,
            variance_model: VarianceModelKind::default(),
            sample_size: SampleSizePolicy::default(),
            beta_decimals: DEFAULT_DECIMALS,
            columns: StatColumns::default(),
        }
    }
}

impl IndirectGwasSettings {
    pub fn propagation_options(&self, num_covar: usize) -> PropagationOptions {
        PropagationOptions {
            chunk_size: self.chunk_size,
            num_threads: self.num_threads.unwrap_or_else(num_cpus::get),
            capacity: self.capacity,
            compress: self.compress,
            quiet: self.quiet,
            columns: self.columns.clone(),
            sample_size: self.sample_size,
            variance_model: self.variance_model,
            num_covar,
        }
    }

    /// File extension of derived statistics.
    pub fn output_extension(&self) -> &'static str {
        if self.compress { "tsv.gz" } else { "tsv" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Holds `cohorts/<name>/...`.
    pub data_root: PathBuf,
    /// Parent of per-request workspaces; the system temporary directory when absent.
    pub temp_root: Option<PathBuf>,
    pub results_root: PathBuf,
    pub result_prefix: String,
    pub url_expiry_secs: u64,
    /// Run every stage except the upload.
    pub dry_run: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            temp_root: None,
            results_root: PathBuf::from("results"),
            result_prefix: "igwas".to_string(),
            url_expiry_secs: 3600,
            dry_run: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gwas = &self.indirect_gwas;
        let positive = |field: &'static str, value: usize| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("indirect_gwas.chunk_size", gwas.chunk_size)?;
        positive("indirect_gwas.capacity", gwas.capacity)?;
        if let Some(threads) = gwas.num_threads {
            positive("indirect_gwas.num_threads", threads)?;
        }
        if self.storage.result_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage.result_prefix",
                reason: "must name a directory inside the results store".to_string(),
            });
        }
        if gwas.beta_decimals > 15 {
            return Err(ConfigError::Invalid {
                field: "indirect_gwas.beta_decimals",
                reason: format!("{} exceeds the 15 digits an f64 holds", gwas.beta_decimals),
            });
        }
        Ok(())
    }

    /// Saves the settings to a file in TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&toml_string)?;
        settings.validate()?;
        log::debug!("Loaded settings from '{}': {settings:?}", path.display());
        Ok(settings)
    }
}

//! Provenance record shipped next to every derived result, so a downloaded file can
//! be traced back to the definition and cohort that produced it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::cohort::CollaboratorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_id: String,
    /// Canonical explicit form of the phenotype definition.
    pub phenotype_definition: String,
    pub cohort: String,
    pub num_subjects: usize,
}

impl RequestMetadata {
    pub fn save(&self, path: &Path) -> Result<(), CollaboratorError> {
        let text = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CollaboratorError> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }
}

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::cohort::CollaboratorError;

/// The object-storage collaborator: durable results addressed by key.
pub trait ObjectStore {
    fn upload(&self, local: &Path, key: &str) -> Result<(), CollaboratorError>;

    /// A time-limited URL from which the object can be fetched.
    fn presigned_url(&self, key: &str) -> Result<String, CollaboratorError>;
}

/// Stores objects as files below a results directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    expiry: Duration,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            root: root.into(),
            expiry,
        }
    }

    /// Keys are relative, `/`-separated and may not leave the store.
    fn object_path(&self, key: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(key);
        let confined = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(CollaboratorError::Upload(format!(
                "object key '{key}' is not a relative path inside the store"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn upload(&self, local: &Path, key: &str) -> Result<(), CollaboratorError> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(local, &target)?;
        log::info!("Uploaded {bytes} bytes to '{}'", target.display());
        Ok(())
    }

    fn presigned_url(&self, key: &str) -> Result<String, CollaboratorError> {
        let path = self.object_path(key)?;
        if !path.is_file() {
            return Err(CollaboratorError::Upload(format!("object '{key}' does not exist")));
        }
        let path = fs::canonicalize(&path)?;
        let expires = (SystemTime::now() + self.expiry)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(format!("file://{}?expires={expires}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upload_copies_and_signs() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.tsv");
        fs::write(&local, "ID\tBETA\tSE\tOBS_CT\n").unwrap();

        let store = LocalObjectStore::new(dir.path().join("results"), Duration::from_secs(60));
        store.upload(&local, "igwas/req-1.tsv").unwrap();
        let copied = dir.path().join("results").join("igwas").join("req-1.tsv");
        assert_eq!(fs::read(&copied).unwrap(), fs::read(&local).unwrap());

        let url = store.presigned_url("igwas/req-1.tsv").unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("req-1.tsv?expires="));
    }

    #[test]
    fn keys_cannot_escape_the_store() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), Duration::from_secs(60));
        for key in ["../x.tsv", "/etc/passwd", ""] {
            assert!(matches!(
                store.presigned_url(key),
                Err(CollaboratorError::Upload(_))
            ));
        }
        assert!(store.presigned_url("missing.tsv").is_err());
    }
}

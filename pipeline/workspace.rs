use rand::Rng;
use rand::distributions::Alphanumeric;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

const REQUEST_ID_MAX_LEN: usize = 128;

/// Request ids name files and object keys, so they are restricted to ASCII letters,
/// digits, `-` and `_`.
pub fn validate_request_id(request_id: &str) -> Result<(), String> {
    if request_id.is_empty() {
        return Err("the request id is empty".to_string());
    }
    if request_id.len() > REQUEST_ID_MAX_LEN {
        return Err(format!(
            "the request id is longer than {REQUEST_ID_MAX_LEN} characters"
        ));
    }
    match request_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        Some(c) => Err(format!("the request id contains the character {c:?}")),
        None => Ok(()),
    }
}

/// A fresh random request id.
pub fn generate_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Per-request scratch directory. Everything in it is removed when the workspace is
/// dropped, on success, failure or unwinding alike.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    request_id: String,
}

impl Workspace {
    pub fn create(temp_root: Option<&Path>, request_id: &str) -> io::Result<Self> {
        let prefix = format!("igwas-{request_id}-");
        let mut builder = Builder::new();
        builder.prefix(&prefix);
        let dir = match temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        log::debug!("Workspace for '{request_id}' at '{}'", dir.path().display());
        Ok(Self {
            dir,
            request_id: request_id.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn beta_path(&self) -> PathBuf {
        self.path().join(format!("{}.beta.csv", self.request_id))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path().join(format!("{}.metadata.toml", self.request_id))
    }

    /// `extension` is `tsv` or `tsv.gz`.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.path().join(format!("{}.{extension}", self.request_id))
    }

    /// Removes the workspace now, reporting any failure instead of ignoring it.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

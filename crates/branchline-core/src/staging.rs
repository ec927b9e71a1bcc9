//! Local staging area for uploaded files.
//!
//! Uploads land in a flat directory (default `Files`) under their own file
//! name and are later committed by name. Only the final path component of
//! an uploaded name is kept, so a client cannot write outside the area.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BranchlineError, Result};

/// Reduce an uploaded name to a bare file name.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => Err(BranchlineError::invalid(format!(
            "'{}' is not a valid file name",
            name
        ))),
        _ => Ok(base.to_string()),
    }
}

/// Directory of files waiting to be committed.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` under the sanitized `file_name`, replacing any earlier
    /// upload of the same name. Returns the name it was stored under.
    pub async fn stage(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let name = sanitize_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(&name);
        let tmp = self.root.join(format!(".{}.upload", name));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(file = %name, bytes = bytes.len(), "staged upload");
        Ok(name)
    }

    /// Read a staged file. `NotFound` if it was never uploaded.
    pub async fn load(&self, file_name: &str) -> Result<Vec<u8>> {
        let name = sanitize_file_name(file_name)?;
        match tokio::fs::read(self.root.join(&name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BranchlineError::NotFound(
                format!("staged file '{}'", name),
            )),
            Err(e) => Err(BranchlineError::Staging(e)),
        }
    }

    /// Names of all staged files, sorted. A missing directory is empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BranchlineError::Staging(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // in-flight uploads
            if name.starts_with('.') && name.ends_with(".upload") {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

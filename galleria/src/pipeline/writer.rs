//! Artifact file writes.

use std::io;
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

/// Writes artifact files atomically.
///
/// Data goes to a temporary sibling first and is renamed into place, so a
/// reader never sees a half-written artifact and regenerating an artifact
/// replaces it in one step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactWriter;

impl ArtifactWriter {
    pub fn new() -> Self {
        Self
    }

    /// Writes `data` to `path`, creating parent directories as needed.
    pub async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Unique per write so concurrent writers of one path never share it.
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let temp_path = Path::new(&temp_name);

        if let Err(e) = tokio::fs::write(temp_path, data).await {
            let _ = tokio::fs::remove_file(temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(temp_path, path).await {
            let _ = tokio::fs::remove_file(temp_path).await;
            return Err(e);
        }

        debug!(path = %path.display(), bytes = data.len(), "Artifact written");
        Ok(())
    }

    /// Returns true if a file exists at `path`.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Removes the file at `path`. A missing file is not an error.
    pub async fn remove(&self, path: &Path) -> io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

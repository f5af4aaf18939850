//! Ephemeral per-job work directories.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("workspace error: {0}")]
pub struct WorkspaceError(#[from] std::io::Error);

/// An owned scratch directory, created fresh for one job and deleted when the
/// job ends.
///
/// Removal is explicit via [`Workspace::remove`] on the normal path; the
/// `Drop` impl is the backstop so panics and task cancellation cannot leak
/// the directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create a unique empty directory under the system temp root.
    ///
    /// The `audit-pit-crew-` prefix makes stray directories easy to identify
    /// when debugging a worker host.
    pub fn create() -> Result<Workspace, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix("audit-pit-crew-")
            .tempdir()?;
        let path = dir.keep();
        tracing::info!("created workspace {}", path.display());
        Ok(Workspace {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory and all contents. Idempotent, and safe when the
    /// directory is already gone.
    pub async fn remove(&mut self) {
        if self.removed {
            return;
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                tracing::info!("removed workspace {}", self.path.display());
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("workspace {} already gone at cleanup", self.path.display());
            }
            Err(err) => {
                tracing::error!("failed to remove workspace {}: {err}", self.path.display());
            }
        }
        self.removed = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_makes_unique_empty_dirs() {
        let a = Workspace::create().unwrap();
        let b = Workspace::create().unwrap();
        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("audit-pit-crew-"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut ws = Workspace::create().unwrap();
        let path = ws.path().to_path_buf();
        tokio::fs::write(path.join("junk.txt"), "junk").await.unwrap();

        ws.remove().await;
        assert!(!path.exists());
        ws.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let path = {
            let ws = Workspace::create().unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}

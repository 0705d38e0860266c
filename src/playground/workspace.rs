use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use super::{ARTIFACT_NAME, SOURCE_NAME, WORKSPACE_PREFIX};

/// Ephemeral directory owned by exactly one request
///
/// Holds the submitted source and, after a successful build, the executable.
/// The directory is removed by [`Workspace::release`] or, on any path that never
/// reaches it (early return, panic, dropped future), when the value is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
    source: PathBuf,
    artifact: PathBuf,
}

impl Workspace {
    /// Creates a uniquely named directory under the system temp dir
    pub fn acquire() -> Result<Self> {
        Self::acquire_in(std::env::temp_dir())
    }

    /// Creates a uniquely named directory under `base`
    pub fn acquire_in(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(base)
            .with_context(|| format!("error creating temp directory in {}", base.display()))?;

        // The program runs with its workspace as working directory, so a
        // relative base would make its own path ambiguous.
        let root = std::path::absolute(dir.path())
            .with_context(|| format!("error resolving workspace {}", dir.path().display()))?;
        log::debug!("acquired workspace {}", root.display());

        Ok(Self {
            source: root.join(SOURCE_NAME),
            artifact: root.join(ARTIFACT_NAME),
            root,
            dir: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Removes the directory and everything in it
    ///
    /// Calling this again after a successful release is a no-op.
    pub fn release(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        dir.close()
            .with_context(|| format!("error removing workspace {}", self.root.display()))?;
        log::debug!("released workspace {}", self.root.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_distinct_directories() {
        let base = tempfile::tempdir().unwrap();
        let first = Workspace::acquire_in(base.path()).unwrap();
        let second = Workspace::acquire_in(base.path()).unwrap();

        assert_ne!(first.root(), second.root());
        assert!(first.root().is_dir());
        assert!(second.root().is_dir());
        assert!(first.source_path().starts_with(first.root()));
        assert!(first.artifact_path().starts_with(first.root()));
        assert!(
            first
                .root()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
        );
    }

    #[test]
    fn test_release_removes_contents() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire_in(base.path()).unwrap();
        std::fs::write(workspace.source_path(), "package main\n").unwrap();
        std::fs::write(workspace.artifact_path(), b"\x7fELF").unwrap();

        let root = workspace.root().to_path_buf();
        workspace.release().unwrap();

        assert!(!root.exists());
        assert!(workspace.is_released());
    }

    #[test]
    fn test_release_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire_in(base.path()).unwrap();

        workspace.release().unwrap();
        workspace.release().unwrap();
        assert!(!workspace.root().exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let workspace = Workspace::acquire_in(base.path()).unwrap();
            std::fs::write(workspace.source_path(), "package main\n").unwrap();
            workspace.root().to_path_buf()
        };

        assert!(!root.exists());
    }

    #[test]
    fn test_paths_are_absolute() {
        let workspace = Workspace::acquire_in(".").unwrap();

        assert!(workspace.root().is_absolute());
        assert!(workspace.source_path().is_absolute());
        assert!(workspace.artifact_path().is_absolute());
    }

    #[test]
    fn test_acquire_in_missing_base_fails() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("does-not-exist");

        let err = Workspace::acquire_in(&missing).unwrap_err();
        assert!(format!("{err}").contains("error creating temp directory"));
    }
}

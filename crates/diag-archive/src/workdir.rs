//! Run-scoped working directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use diag_common::{DiagError, DiagResult};

/// An owned temporary tree for one run.
///
/// Created empty at run start; removed recursively exactly once, either
/// through an explicit [`remove`](WorkDir::remove) call or through `Drop`
/// as the fallback. No exit path leaves the tree behind.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Create the working directory, replacing any stale leftover from an
    /// earlier run at the same path.
    pub fn create(path: impl Into<PathBuf>) -> DiagResult<Self> {
        let path = path.into();
        if path.exists() {
            debug!(path = %path.display(), "Removing stale working directory");
            std::fs::remove_dir_all(&path).map_err(|err| {
                DiagError::resource("remove", path.display().to_string(), err.to_string())
            })?;
        }
        std::fs::create_dir_all(&path).map_err(|err| {
            DiagError::resource("create", path.display().to_string(), err.to_string())
        })?;
        debug!(path = %path.display(), "Working directory created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the tree. Idempotent; failure is reported once and the
    /// `Drop` fallback will not retry.
    pub fn remove(&mut self) -> DiagResult<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Working directory removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DiagError::resource(
                "remove",
                self.path.display().to_string(),
                err.to_string(),
            )),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(err) = self.remove() {
                warn!(%err, "Working directory cleanup failed on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_explicit_remove() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("work");
        let mut workdir = WorkDir::create(&path).unwrap();
        assert!(path.is_dir());
        workdir.remove().unwrap();
        assert!(!path.exists());
        // Idempotent.
        workdir.remove().unwrap();
    }

    #[test]
    fn test_drop_removes_tree() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("work");
        {
            let workdir = WorkDir::create(&path).unwrap();
            std::fs::create_dir_all(workdir.path().join("rest")).unwrap();
            std::fs::write(workdir.path().join("rest/health.json"), "{}").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_create_replaces_stale_directory() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("work");
        std::fs::create_dir_all(path.join("leftover")).unwrap();
        std::fs::write(path.join("leftover/old.txt"), "stale").unwrap();

        let workdir = WorkDir::create(&path).unwrap();
        assert!(workdir.path().is_dir());
        assert!(!path.join("leftover").exists());
    }
}

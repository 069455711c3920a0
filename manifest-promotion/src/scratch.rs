//! Per-request scratch filesystem.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// A uniquely-named temporary directory tree, exclusively owned by one
/// request. `mkdir` ensures nested directories under the root (rejecting
/// absolute escapes); `clear` removes the entire root and is guaranteed to
/// run on every exit path of the stream handler.
pub struct ScratchFs {
    root: PathBuf,
    _guard: Option<tempfile::TempDir>,
}

impl ScratchFs {
    /// Creates a new uniquely-named temp directory under the system temp
    /// root.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("manifest-promotion-")
            .tempdir()
            .context("failed to create scratch directory")?;
        let root = dir.path().to_path_buf();
        Ok(Self {
            root,
            _guard: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures a nested directory exists under the root and returns its
    /// absolute path. Rejects absolute paths and `..` escapes.
    pub fn mkdir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            bail!("refusing to create absolute path {relative:?} under scratch root");
        }
        if relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            bail!("refusing to create escaping path {relative:?} under scratch root");
        }

        let full = self.root.join(relative);
        std::fs::create_dir_all(&full)
            .with_context(|| format!("failed to create directory {full:?}"))?;
        Ok(full)
    }

    /// Removes the entire scratch root. Idempotent and safe to call more
    /// than once (e.g. from both a cancellation path and a `Drop`).
    pub fn clear(&mut self) {
        self._guard = None;
        let _ = std::fs::remove_dir_all(&self.root);
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkdir_rejects_absolute_paths() {
        let fs = ScratchFs::new().unwrap();
        assert!(fs.mkdir("/etc/passwd").is_err());
    }

    #[test]
    fn mkdir_rejects_parent_escapes() {
        let fs = ScratchFs::new().unwrap();
        assert!(fs.mkdir("../escape").is_err());
    }

    #[test]
    fn mkdir_creates_nested_directory() {
        let fs = ScratchFs::new().unwrap();
        let dir = fs.mkdir("repository").unwrap();
        assert!(dir.exists());
        assert_eq!(dir, fs.root().join("repository"));
    }

    #[test]
    fn clear_removes_root_and_is_idempotent() {
        let mut fs = ScratchFs::new().unwrap();
        fs.mkdir("upload").unwrap();
        assert!(fs.exists());
        fs.clear();
        assert!(!fs.exists());
        fs.clear();
        assert!(!fs.exists());
    }
}

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use super::keys::CacheKey;

/// Root directory holding all cached exports.
///
/// Parent directories are created on demand; creation is idempotent and safe when
/// sibling keys race to create the same directory.
#[derive(Debug, Clone)]
pub struct CacheDirectory {
    root: PathBuf,
}

impl CacheDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem location for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key.to_path(&self.root)
    }

    /// Create the directory that will hold `path`, if it does not exist yet.
    pub async fn ensure_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => fs::create_dir_all(parent).await,
            None => Ok(()),
        }
    }
}

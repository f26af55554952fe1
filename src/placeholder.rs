use std::path::{Path, PathBuf};

/// Static stub image shown while variants are outstanding or after the owner
/// is gone. Nothing in dispatch or cleanup ever writes or removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    path: PathBuf,
}

impl Placeholder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Placeholder { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}

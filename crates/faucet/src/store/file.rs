use super::{RateLimitState, RateLimitStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Snapshot as a pretty-printed JSON file.
///
/// Saves write a sibling temp file and rename it over the target, so a
/// crash mid-write leaves the previous snapshot intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl RateLimitStore for JsonFileStore {
    async fn load(&self) -> Result<RateLimitState, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RateLimitState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &RateLimitState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let dir = self.parent_dir();
        let target = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

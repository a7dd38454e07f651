use super::{RateLimitState, RateLimitStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

const TREE_NAME: &str = "rate_limits";
const SNAPSHOT_KEY: &[u8] = b"snapshot";

/// Keeps the snapshot as one JSON value under a single sled key. Single-key
/// inserts are atomic, so readers see either the old or the new document.
pub struct SledStore {
    tree: ::sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = ::sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(16 * 1024 * 1024)
            .open()?;
        Self::from_db(&db)
    }

    /// Create a store from an existing sled::Db
    pub fn from_db(db: &::sled::Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }
}

#[async_trait]
impl RateLimitStore for SledStore {
    async fn load(&self) -> Result<RateLimitState, StoreError> {
        let tree = self.tree.clone();

        tokio::task::spawn_blocking(move || -> Result<RateLimitState, StoreError> {
            match tree.get(SNAPSHOT_KEY)? {
                Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
                None => Ok(RateLimitState::default()),
            }
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    async fn save(&self, state: &RateLimitState) -> Result<(), StoreError> {
        let tree = self.tree.clone();
        let bytes = serde_json::to_vec(state)?;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            tree.insert(SNAPSHOT_KEY, bytes)?;
            let flushed = tree.flush()?;
            debug!("Flushed {} bytes of rate-limit state", flushed);
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    fn backend(&self) -> &'static str {
        "sled"
    }
}

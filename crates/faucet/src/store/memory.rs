use super::{RateLimitState, RateLimitStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::RwLock;

/// Process-local snapshot; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<RateLimitState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RateLimitState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn load(&self) -> Result<RateLimitState, StoreError> {
        self.state
            .read()
            .map(|state| state.clone())
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    async fn save(&self, state: &RateLimitState) -> Result<(), StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        *guard = state.clone();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

//! In-memory storage

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::Storage;
use crate::key::CacheKey;
use crate::record::Exchange;
use crate::{Result, RewindError};

/// Process-local storage backed by a concurrent map
///
/// Useful when recordings only need to live as long as one test run.
#[derive(Default)]
pub struct MemoryStorage {
    exchanges: DashMap<CacheKey, Exchange>,
}

impl MemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored exchanges
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// True if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Remove every exchange
    pub fn clear(&self) {
        self.exchanges.clear();
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(
        &self,
        key: &CacheKey,
        exchange: &Exchange,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RewindError::Cancelled);
        }

        self.exchanges.insert(key.clone(), exchange.clone());
        Ok(())
    }

    async fn get(&self, key: &CacheKey, cancel: &CancellationToken) -> Result<Option<Exchange>> {
        if cancel.is_cancelled() {
            return Err(RewindError::Cancelled);
        }

        Ok(self.exchanges.get(key).map(|entry| entry.value().clone()))
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self
            .exchanges
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

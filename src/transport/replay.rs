//! Replay transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Transport;
use crate::key::{derive_key, KeyPolicy};
use crate::record::{RequestRecord, ResponseRecord};
use crate::storage::Storage;
use crate::{Result, RewindError};

/// Serves recorded responses without touching the network
///
/// Fail-closed: a request with no recording fails with
/// [`RewindError::NoRecordingFound`] unless a fallback transport was set
/// explicitly with [`ReplayTransport::with_fallback`].
pub struct ReplayTransport {
    storage: Arc<dyn Storage>,
    policy: KeyPolicy,
    fallback: Option<Arc<dyn Transport>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ReplayTransport {
    /// Replay from `storage`
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            policy: KeyPolicy::default(),
            fallback: None,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Use a non-default key policy; must match the recorder's
    #[must_use]
    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Send unmatched requests to `fallback` instead of failing
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Lookup counters
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        ReplayStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn round_trip(
        &self,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<ResponseRecord> {
        let key = derive_key(&request, &self.policy);

        if let Some(exchange) = self.storage.get(&key, cancel).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Replay hit: {} {} -> {}",
                request.method, request.url, exchange.response.status
            );
            return Ok(exchange.response);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(fallback) = &self.fallback {
            debug!(
                "Replay miss, using fallback: {} {}",
                request.method, request.url
            );
            return fallback.round_trip(request, cancel).await;
        }

        warn!(
            "Replay miss: {} {} (key: {})",
            request.method,
            request.url,
            &key.as_str()[..16]
        );
        Err(RewindError::NoRecordingFound {
            key,
            method: request.method,
            url: request.url,
        })
    }
}

/// Replay counters
#[derive(Debug, Clone, Copy)]
pub struct ReplayStats {
    /// Requests served from storage
    pub hits: usize,
    /// Requests with no recording
    pub misses: usize,
    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Exchange;
    use crate::storage::MemoryStorage;
    use crate::CacheKey;
    use std::io;

    async fn seeded(request: &RequestRecord, response: ResponseRecord) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let key = derive_key(request, &KeyPolicy::default());
        storage
            .put(
                &key,
                &Exchange::new(request.clone(), response),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        storage
    }

    struct UnreadableStorage;

    #[async_trait]
    impl Storage for UnreadableStorage {
        async fn put(&self, _: &CacheKey, _: &Exchange, _: &CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn get(&self, _: &CacheKey, _: &CancellationToken) -> Result<Option<Exchange>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied").into())
        }

        async fn keys(&self) -> Result<Vec<CacheKey>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_replay_hit() {
        let request = RequestRecord::new("GET", "http://example.com/a");
        let recorded = ResponseRecord::new(200, "hello").header("X-Trace", "1");
        let storage = seeded(&request, recorded.clone()).await;

        let replay = ReplayTransport::new(storage);
        let response = replay
            .round_trip(request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, recorded);
        assert_eq!(replay.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_replay_miss_fails_closed() {
        let replay = ReplayTransport::new(Arc::new(MemoryStorage::new()));

        let err = replay
            .round_trip(
                RequestRecord::new("GET", "http://example.com/x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            RewindError::NoRecordingFound { url, method, .. } => {
                assert_eq!(url, "http://example.com/x");
                assert_eq!(method, "GET");
            }
            other => panic!("unexpected error: {other}"),
        }

        let stats = replay.stats();
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_storage_error_is_not_a_miss() {
        let replay = ReplayTransport::new(Arc::new(UnreadableStorage));

        let err = replay
            .round_trip(
                RequestRecord::new("GET", "http://example.com/x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_storage());
        assert_eq!(replay.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_policy_mismatch_misses() {
        let request = RequestRecord::new("GET", "http://example.com/a").header("Accept", "text/plain");
        let storage = seeded(&request, ResponseRecord::new(200, "hello")).await;

        let replay = ReplayTransport::new(storage).with_policy(KeyPolicy::with_headers(["accept"]));
        let result = replay.round_trip(request, &CancellationToken::new()).await;

        assert!(matches!(result, Err(RewindError::NoRecordingFound { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_lookup() {
        let request = RequestRecord::new("GET", "http://example.com/a");
        let storage = seeded(&request, ResponseRecord::new(200, "hello")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ReplayTransport::new(storage).round_trip(request, &cancel).await;
        assert!(matches!(result, Err(RewindError::Cancelled)));
    }
}

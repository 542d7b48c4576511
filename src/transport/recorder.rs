//! Recording transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Transport;
use crate::key::{derive_key, KeyPolicy};
use crate::record::{Exchange, RequestRecord, ResponseRecord};
use crate::storage::Storage;
use crate::{Result, RewindError};

/// Wraps a real transport and stores every successful exchange
///
/// Recording is a side effect: if the storage write fails for any reason
/// other than cancellation, the failure is logged and counted and the real
/// response is still returned.
pub struct RecorderTransport {
    inner: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    policy: KeyPolicy,
    recorded: AtomicUsize,
    storage_failures: AtomicUsize,
}

impl RecorderTransport {
    /// Record exchanges of `inner` into `storage`
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, storage: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            storage,
            policy: KeyPolicy::default(),
            recorded: AtomicUsize::new(0),
            storage_failures: AtomicUsize::new(0),
        }
    }

    /// Use a non-default key policy; replay must use the same one
    #[must_use]
    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Recording counters
    #[must_use]
    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Transport for RecorderTransport {
    async fn round_trip(
        &self,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<ResponseRecord> {
        if cancel.is_cancelled() {
            return Err(RewindError::Cancelled);
        }

        // Bytes bodies are shared, so the inner transport still gets the full body
        let captured = request.clone();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RewindError::Cancelled),
            response = self.inner.round_trip(request, cancel) => response?,
        };

        let key = derive_key(&captured, &self.policy);
        let exchange = Exchange::new(captured, response.clone());

        match self.storage.put(&key, &exchange, cancel).await {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Recorded {} {} -> {} (key: {})",
                    exchange.request.method,
                    exchange.request.url,
                    response.status,
                    &key.as_str()[..16]
                );
            }
            Err(RewindError::Cancelled) => return Err(RewindError::Cancelled),
            Err(e) => {
                self.storage_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Failed to record {} {}: {e}",
                    exchange.request.method, exchange.request.url
                );
            }
        }

        Ok(response)
    }
}

/// Recorder counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    /// Exchanges written to storage
    pub recorded: usize,
    /// Exchanges lost to storage errors
    pub storage_failures: usize,
}

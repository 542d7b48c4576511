//! Shared test doubles

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rewind::{RequestRecord, ResponseRecord, Result, Transport};

type Responder = Box<dyn Fn(&RequestRecord, usize) -> ResponseRecord + Send + Sync>;

/// Transport double that counts calls and answers from a closure
pub struct StubTransport {
    calls: AtomicUsize,
    delay: Duration,
    responder: Responder,
}

impl StubTransport {
    /// Answer every request with `status` and `body`
    pub fn fixed(status: u16, body: &'static str) -> Self {
        Self::with(move |_, _| ResponseRecord::new(status, body))
    }

    /// Answer with `responder(request, call_index)`
    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&RequestRecord, usize) -> ResponseRecord + Send + Sync + 'static,
    {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            responder: Box::new(responder),
        }
    }

    /// Wait this long before answering
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of round trips performed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn round_trip(
        &self,
        request: RequestRecord,
        _cancel: &CancellationToken,
    ) -> Result<ResponseRecord> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok((self.responder)(&request, call))
    }
}

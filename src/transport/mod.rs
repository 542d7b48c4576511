//! Transports: real network, recording, and replay
//!
//! Every transport performs one request and yields one response, so a
//! recorder or replayer can stand in wherever the network transport is used.

mod network;
mod recorder;
mod replay;

pub use network::HyperTransport;
pub use recorder::{RecorderStats, RecorderTransport};
pub use replay::{ReplayStats, ReplayTransport};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, MissPolicy, Mode};
use crate::record::{RequestRecord, ResponseRecord};
use crate::storage::DirectoryStorage;
use crate::Result;

/// Capability to perform one HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform `request` and return its response
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::Cancelled`](crate::RewindError::Cancelled)
    /// once `cancel` fires, or a transport-specific failure.
    async fn round_trip(
        &self,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<ResponseRecord>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(
        &self,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<ResponseRecord> {
        (**self).round_trip(request, cancel).await
    }
}

/// Build the transport a configuration asks for around a real transport
///
/// - `record`: a recorder writing to `recording_dir`
/// - `replay`: a replayer reading `recording_dir`; `real` is only used on a
///   miss when `replay.on_miss = "passthrough"`
/// - `live`: `real` unchanged
///
/// # Errors
///
/// Returns error if the configuration is invalid or the recording
/// directory cannot be opened
pub fn for_mode(config: &Config, real: Arc<dyn Transport>) -> Result<Arc<dyn Transport>> {
    config.validate()?;
    let policy = config.key.policy();

    let transport: Arc<dyn Transport> = match config.mode {
        Mode::Record => {
            let storage = Arc::new(DirectoryStorage::open(&config.recording_dir)?);
            Arc::new(RecorderTransport::new(real, storage).with_policy(policy))
        }
        Mode::Replay => {
            let storage = Arc::new(DirectoryStorage::open(&config.recording_dir)?);
            let replay = ReplayTransport::new(storage).with_policy(policy);
            match config.replay.on_miss {
                MissPolicy::Fail => Arc::new(replay),
                MissPolicy::Passthrough => Arc::new(replay.with_fallback(real)),
            }
        }
        Mode::Live => real,
    };

    info!(
        "Transport ready: {:?} mode, recordings in {}",
        config.mode,
        config.recording_dir.display()
    );

    Ok(transport)
}

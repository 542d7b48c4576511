//! Persistence of recorded exchanges

mod directory;
mod format;
mod memory;

pub use directory::DirectoryStorage;
pub use format::{
    decode_exchange, encode_exchange, validate_header, FileHeader, FILE_EXTENSION, FILE_MAGIC,
    FILE_VERSION, HEADER_SIZE,
};
pub use memory::MemoryStorage;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::key::CacheKey;
use crate::record::Exchange;
use crate::Result;

/// Keyed store holding at most one exchange per key
///
/// Implementations are shared between every recorder and replayer using the
/// same location, so they must tolerate concurrent calls. A `put` to a key
/// replaces any earlier exchange atomically; a concurrent `get` sees either
/// the old or the new exchange, never a mix.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an exchange, replacing any previous one for the key
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::Cancelled`](crate::RewindError::Cancelled) if
    /// `cancel` fires before the write commits, or a storage error if the
    /// medium fails. Nothing is stored in either case.
    async fn put(&self, key: &CacheKey, exchange: &Exchange, cancel: &CancellationToken)
        -> Result<()>;

    /// Fetch the exchange for a key; `Ok(None)` when nothing is stored
    ///
    /// # Errors
    ///
    /// Returns a storage error if presence cannot be determined or the
    /// stored data is unreadable.
    async fn get(&self, key: &CacheKey, cancel: &CancellationToken) -> Result<Option<Exchange>>;

    /// List stored keys in sorted order
    ///
    /// # Errors
    ///
    /// Returns a storage error if the medium cannot be listed
    async fn keys(&self) -> Result<Vec<CacheKey>>;
}

//! One-file-per-key directory storage

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use memmap2::Mmap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::format::{decode_exchange, encode_exchange, FILE_EXTENSION, HEADER_SIZE};
use super::Storage;
use crate::key::CacheKey;
use crate::record::Exchange;
use crate::{Result, RewindError};

/// Bytes written between cancellation checks
const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum scope name length
const SCOPE_NAME_MAX: usize = 255;

/// Stores each exchange as `<dir>/<key>.rewind`
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the target, so readers only ever see complete files.
/// Clones share their per-key write locks.
#[derive(Clone)]
pub struct DirectoryStorage {
    dir: PathBuf,
    write_locks: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl DirectoryStorage {
    /// Open a storage directory, creating it if missing
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        debug!("Opened recording directory {}", dir.display());

        Ok(Self {
            dir,
            write_locks: Arc::new(DashMap::new()),
        })
    }

    /// Open the named sub-directory, e.g. one per test
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a plain directory name or the
    /// directory cannot be created
    pub fn scoped(&self, name: &str) -> Result<Self> {
        validate_scope_name(name)?;
        Self::open(self.dir.join(name))
    }

    /// Root directory of this storage
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the exchange for a key
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{FILE_EXTENSION}"))
    }

    fn write_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(self.write_locks.entry(key.clone()).or_default().value())
    }
}

/// Removes a key's write lock from the map once no writer holds it
struct LockEntry<'a> {
    locks: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: &'a CacheKey,
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl Storage for DirectoryStorage {
    async fn put(
        &self,
        key: &CacheKey,
        exchange: &Exchange,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RewindError::Cancelled);
        }

        let data = encode_exchange(exchange)?;

        // Same-key writers queue here so the last one to rename wins whole
        let lock = self.write_lock(key);
        let _entry = LockEntry {
            locks: &self.write_locks,
            key,
        };
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RewindError::Cancelled),
            guard = lock.lock_owned() => guard,
        };

        // Dropping this future cancels the detached write before its rename
        let write_cancel = cancel.child_token();
        let _abandon = write_cancel.clone().drop_guard();

        let dir = self.dir.clone();
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &data, &write_cancel))
            .await
            .map_err(join_error)??;

        debug!("Stored exchange {}", key);
        Ok(())
    }

    async fn get(&self, key: &CacheKey, cancel: &CancellationToken) -> Result<Option<Exchange>> {
        let path = self.path_for(key);
        let read = tokio::task::spawn_blocking(move || read_exchange(&path));

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RewindError::Cancelled),
            result = read => result.map_err(join_error)?,
        }
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_keys(&dir))
            .await
            .map_err(join_error)?
    }
}

/// Write `data` next to `path` and rename it into place
///
/// The temporary file is deleted on every early return, so a cancelled or
/// failed write leaves the previous exchange (if any) untouched.
fn write_atomic(dir: &Path, path: &Path, data: &[u8], cancel: &CancellationToken) -> Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .suffix(".partial")
        .tempfile_in(dir)?;

    for chunk in data.chunks(WRITE_CHUNK_SIZE) {
        if cancel.is_cancelled() {
            return Err(RewindError::Cancelled);
        }
        temp.write_all(chunk)?;
    }
    temp.as_file().sync_all()?;

    // Rename is the commit point
    if cancel.is_cancelled() {
        return Err(RewindError::Cancelled);
    }
    temp.persist(path).map_err(|e| RewindError::Storage(e.error))?;

    Ok(())
}

fn read_exchange(path: &Path) -> Result<Option<Exchange>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Err(RewindError::InvalidFormat(format!(
            "{} is too small to contain header ({len} bytes)",
            path.display()
        )));
    }

    // SAFETY: exchange files are replaced by rename, never rewritten in place,
    // so the mapped inode stays immutable while mapped.
    let mmap = unsafe { Mmap::map(&file)? };
    decode_exchange(&mmap).map(Some)
}

fn list_keys(dir: &Path) -> Result<Vec<CacheKey>> {
    let mut keys = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().and_then(|s| s.to_str()) != Some(FILE_EXTENSION) {
            continue;
        }

        if let Some(key) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<CacheKey>().ok())
        {
            keys.push(key);
        }
    }

    keys.sort();
    Ok(keys)
}

fn join_error(e: tokio::task::JoinError) -> RewindError {
    RewindError::Storage(io::Error::other(e))
}

/// Validate a scope name
///
/// # Errors
///
/// Returns error if the name could escape the storage directory
fn validate_scope_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RewindError::InvalidScope(
            "Scope name cannot be empty".to_string(),
        ));
    }

    if name.len() > SCOPE_NAME_MAX {
        return Err(RewindError::InvalidScope(format!(
            "Scope name too long: {} > {SCOPE_NAME_MAX}",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(RewindError::InvalidScope(
            "Scope name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(RewindError::InvalidScope(
            "Scope name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(RewindError::InvalidScope(
            "Scope name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(RewindError::InvalidScope(
            "Scope name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

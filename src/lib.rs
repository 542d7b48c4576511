//! Rewind - record/replay HTTP transports for deterministic tests
//!
//! A [`RecorderTransport`](transport::RecorderTransport) wraps a real
//! transport and stores every exchange; a
//! [`ReplayTransport`](transport::ReplayTransport) serves those exchanges
//! back without network access. Both implement
//! [`Transport`](transport::Transport), so callers cannot tell them apart.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod key;
pub mod record;
pub mod storage;
pub mod transport;

pub use error::{RewindError, Result};
pub use key::{derive_key, CacheKey, KeyPolicy};
pub use record::{Exchange, Headers, RequestRecord, ResponseRecord};
pub use storage::{DirectoryStorage, MemoryStorage, Storage};
pub use transport::{HyperTransport, RecorderTransport, ReplayTransport, Transport};

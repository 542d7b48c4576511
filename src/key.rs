//! Cache key derivation for deterministic request lookup

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::record::RequestRecord;
use crate::RewindError;

/// Length of a key in hex characters
pub const KEY_LEN: usize = 64;

/// Which request fields participate in the cache key
///
/// Method, URL and body always participate. Headers only participate when
/// named here; the default names none, so volatile headers (dates, auth
/// tokens, user agents) never cause a replay miss.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPolicy {
    include_headers: Vec<String>,
}

impl KeyPolicy {
    /// Policy that ignores all headers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that also hashes the named headers
    #[must_use]
    pub fn with_headers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include_headers: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        include_headers.sort();
        include_headers.dedup();

        Self { include_headers }
    }

    /// Header names (lower-case, sorted) that participate
    #[must_use]
    pub fn included_headers(&self) -> &[String] {
        &self.include_headers
    }
}

/// Hex-encoded SHA-256 identifier of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key text; always safe as a file name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheKey {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_LEN {
            return Err(RewindError::InvalidKey(format!(
                "expected {KEY_LEN} hex characters, got {}",
                s.len()
            )));
        }

        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(RewindError::InvalidKey(format!(
                "'{s}' is not lower-case hex"
            )));
        }

        Ok(Self(s.to_string()))
    }
}

/// Compute the cache key of a request
///
/// The hash covers, each length-prefixed:
/// 1. Method (uppercase normalized)
/// 2. URL (trimmed, query included verbatim)
/// 3. Headers named by the policy (sorted, values trimmed)
/// 4. Body
#[must_use]
pub fn derive_key(request: &RequestRecord, policy: &KeyPolicy) -> CacheKey {
    let mut hasher = Sha256::new();

    // 1. Method
    let method = request.method.trim().to_ascii_uppercase();
    update_field(&mut hasher, method.as_bytes());

    // 2. URL
    update_field(&mut hasher, request.url.trim().as_bytes());

    // 3. Selected headers; absent ones still mark their slot
    hasher.update((policy.include_headers.len() as u32).to_le_bytes());
    for name in &policy.include_headers {
        let values = request.headers.get_all(name);
        update_field(&mut hasher, name.as_bytes());
        hasher.update((values.len() as u32).to_le_bytes());
        for value in values {
            update_field(&mut hasher, value.trim().as_bytes());
        }
    }

    // 4. Body
    hasher.update((request.body.len() as u64).to_le_bytes());
    hasher.update(&request.body);

    CacheKey(hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u32).to_le_bytes());
    hasher.update(data);
}

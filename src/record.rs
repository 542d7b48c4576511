//! Captured request/response data

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;

use crate::{Result, RewindError};

/// Header mapping with case-insensitive names and ordered values
///
/// Names are stored lower-cased and iterated in sorted order, so two maps
/// holding the same headers always iterate identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Create an empty header mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the name
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values for a name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Builder-style [`Headers::append`]
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    /// First value for a name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for a name, in insertion order
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Iterate `(name, values)` pairs sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total number of values across all names
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// True if no headers are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert from a hyper header map
    ///
    /// Values that are not valid UTF-8 are converted lossily.
    #[must_use]
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            let value = match value.to_str() {
                Ok(text) => text.to_string(),
                Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
            };
            headers.append(name.as_str(), value);
        }
        headers
    }

    /// Convert into a hyper header map
    ///
    /// # Errors
    ///
    /// Returns error if a name or value is not valid in an HTTP header
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.value_count());
        for (name, values) in self.iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RewindError::InvalidRequest(format!("Invalid header name '{name}': {e}")))?;
            for value in values {
                let header_value = HeaderValue::from_str(value).map_err(|e| {
                    RewindError::InvalidRequest(format!("Invalid value for header '{name}': {e}"))
                })?;
                map.append(header_name.clone(), header_value);
            }
        }
        Ok(map)
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// Outgoing HTTP request as seen by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// Absolute URL including query
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Bytes,
}

impl RequestRecord {
    /// Create a request without headers or body
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header value
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the body
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// HTTP response as produced by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

impl ResponseRecord {
    /// Create a response without headers
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Add a header value
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// A persisted request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Captured request
    pub request: RequestRecord,
    /// Captured response
    pub response: ResponseRecord,
    /// Capture time (Unix epoch nanoseconds)
    pub recorded_at: u64,
}

impl Exchange {
    /// Pair a request with its response, stamped with the current time
    #[must_use]
    pub fn new(request: RequestRecord, response: ResponseRecord) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);

        Self {
            request,
            response,
            recorded_at,
        }
    }
}

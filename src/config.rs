//! Configuration types for Rewind

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::key::KeyPolicy;
use crate::{Result, RewindError};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: call the network and store every exchange
    Record,
    /// Replay mode: serve from recordings
    Replay,
    /// Live mode: call the network, store nothing
    Live,
}

impl Mode {
    /// Check if mode is Record
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Mode::Record)
    }

    /// Check if mode is Replay
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Operating mode
    pub mode: Mode,
    /// Directory for storing/loading recordings
    pub recording_dir: PathBuf,
    /// Cache key derivation
    #[serde(default)]
    pub key: KeyConfig,
    /// Replay behavior
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Cache key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Headers that participate in the cache key (none by default)
    #[serde(default)]
    pub include_headers: Vec<String>,
}

impl KeyConfig {
    /// Key policy described by this configuration
    #[must_use]
    pub fn policy(&self) -> KeyPolicy {
        KeyPolicy::with_headers(&self.include_headers)
    }
}

/// What replay does when no recording matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    /// Fail with a missing-recording error
    #[default]
    Fail,
    /// Forward the request to the real network
    Passthrough,
}

/// Replay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Behavior on a missing recording
    #[serde(default)]
    pub on_miss: MissPolicy,
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Maximum response body size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
        }
    }
}

impl Config {
    /// Configuration with default key, replay and limit settings
    #[must_use]
    pub fn new(mode: Mode, recording_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            recording_dir: recording_dir.into(),
            key: KeyConfig::default(),
            replay: ReplayConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RewindError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text cannot be parsed or is invalid
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RewindError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.recording_dir.as_os_str().is_empty() {
            return Err(RewindError::Config(
                "recording_dir cannot be empty".to_string(),
            ));
        }

        // Replay never creates recordings, so the directory must already exist
        if self.mode.is_replay() && !self.recording_dir.is_dir() {
            return Err(RewindError::Config(format!(
                "Recording directory does not exist: {}",
                self.recording_dir.display()
            )));
        }

        for (i, name) in self.key.include_headers.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(RewindError::Config(format!(
                    "key.include_headers[{i}] cannot be empty"
                )));
            }
        }

        let limits = [
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
            ("max_headers", self.limits.max_headers),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(RewindError::Config(format!("limits.{name} must be > 0")));
            }
        }

        Ok(())
    }
}

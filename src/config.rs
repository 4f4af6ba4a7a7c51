//! Persistent session configuration
//!
//! Stores subject/session identity, stream names, and acquisition parameters
//! in a JSON file at `<data_dir>/neuroacq/session.json`. Every field has a
//! default, so a partial file is valid.

use anyhow::Context;
use neuroacq_core::epochs::EpochWindow;
use neuroacq_core::AcquisitionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_subject_id() -> String {
    "test".to_string()
}

fn default_session_id() -> String {
    "1".to_string()
}

fn default_biosignal_stream() -> String {
    "OpenBCIEEG".to_string()
}

fn default_marker_stream() -> Option<String> {
    Some("Markers".to_string())
}

fn default_duration_secs() -> f64 {
    60.0
}

fn default_chunk_size() -> usize {
    neuroacq_core::DEFAULT_CHUNK_SIZE
}

fn default_resolve_timeout_secs() -> f64 {
    neuroacq_core::DEFAULT_RESOLVE_TIMEOUT_SECS
}

fn default_poll_timeout_secs() -> f64 {
    neuroacq_core::DEFAULT_POLL_TIMEOUT_SECS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_epoch_tmin() -> f64 {
    EpochWindow::default().tmin
}

fn default_epoch_tmax() -> f64 {
    EpochWindow::default().tmax
}

/// Configuration for one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_subject_id")]
    pub subject_id: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Name of the biosignal stream to bind
    #[serde(default = "default_biosignal_stream")]
    pub biosignal_stream: String,
    /// Name of the marker stream (None = record without markers)
    #[serde(default = "default_marker_stream")]
    pub marker_stream: Option<String>,
    /// Channel names for the outputs (empty = use the stream's labels)
    #[serde(default)]
    pub channel_names: Vec<String>,
    /// Sample rate for the outputs (None = stream nominal rate)
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: f64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_epoch_tmin")]
    pub epoch_tmin: f64,
    #[serde(default = "default_epoch_tmax")]
    pub epoch_tmax: f64,
    /// Replace sample times with a least-squares fit before saving
    #[serde(default)]
    pub dejitter: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subject_id: default_subject_id(),
            session_id: default_session_id(),
            biosignal_stream: default_biosignal_stream(),
            marker_stream: default_marker_stream(),
            channel_names: Vec::new(),
            sample_rate: None,
            duration_secs: default_duration_secs(),
            chunk_size: default_chunk_size(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            output_dir: default_output_dir(),
            epoch_tmin: default_epoch_tmin(),
            epoch_tmax: default_epoch_tmax(),
            dejitter: false,
        }
    }
}

impl SessionConfig {
    /// Config file path: `<data_dir>/neuroacq/session.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neuroacq")
            .join("session.json")
    }

    /// Load config from the default path, falling back to defaults on any
    /// error
    pub fn load() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded session config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse session config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No session config found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path; missing or malformed files are
    /// errors
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded session config");
        Ok(config)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Session config saved to disk");
        Ok(())
    }

    /// Check values the pipeline cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be positive");
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            anyhow::bail!("duration_secs must be a non-negative number");
        }
        if !(self.poll_timeout_secs.is_finite() && self.poll_timeout_secs > 0.0) {
            anyhow::bail!("poll_timeout_secs must be positive");
        }
        if !(self.resolve_timeout_secs.is_finite() && self.resolve_timeout_secs >= 0.0) {
            anyhow::bail!("resolve_timeout_secs must be non-negative");
        }
        if let Some(rate) = self.sample_rate {
            if !(rate.is_finite() && rate > 0.0) {
                anyhow::bail!("sample_rate must be positive");
            }
        }
        if self.epoch_tmax < self.epoch_tmin {
            anyhow::bail!("epoch_tmax must not be below epoch_tmin");
        }
        if self.subject_id.trim().is_empty() {
            anyhow::bail!("subject_id must not be empty");
        }
        Ok(())
    }

    /// Stream names to discover
    pub fn stream_names(&self) -> Vec<String> {
        std::iter::once(self.biosignal_stream.clone())
            .chain(self.marker_stream.clone())
            .collect()
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.resolve_timeout_secs)
    }

    /// Acquisition loop parameters
    pub fn acquisition(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            duration: Duration::from_secs_f64(self.duration_secs),
            chunk_size: self.chunk_size,
            poll_timeout: Duration::from_secs_f64(self.poll_timeout_secs),
            ..AcquisitionConfig::default()
        }
    }

    pub fn epoch_window(&self) -> EpochWindow {
        EpochWindow::new(self.epoch_tmin, self.epoch_tmax)
    }
}

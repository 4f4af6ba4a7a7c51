//! Error types for stream discovery, acquisition, assembly, and persistence

use crate::stream::{InletError, StreamKind};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the acquisition pipeline
///
/// Discovery errors abort before any polling happens. Dropped chunks are not
/// errors; they only show up in the drop log.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No stream named '{name}' resolved within {timeout:?}")]
    StreamNotFound { name: String, timeout: Duration },

    #[error("Expected at most one {kind} stream, found {}: {names:?}", names.len())]
    AmbiguousStream { kind: StreamKind, names: Vec<String> },

    #[error("None of the requested streams {requested:?} carries biosignal data")]
    MissingBiosignalStream { requested: Vec<String> },

    #[error("Failed to open subscription to stream '{name}': {source}")]
    StreamBind {
        name: String,
        #[source]
        source: InletError,
    },

    #[error(
        "Failed to read from stream '{stream}' at chunk {sequence} (dropped before failure: {drop_log:?}): {source}"
    )]
    StreamRead {
        stream: String,
        sequence: u64,
        /// Drop log accumulated before the failure
        drop_log: Vec<u64>,
        #[source]
        source: InletError,
    },

    #[error("No complete chunks were collected")]
    EmptyAcquisition,

    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to write {artifact} to {}: {source}", path.display())]
    Persistence {
        artifact: &'static str,
        path: PathBuf,
        /// Artifacts already on disk when the failure happened
        written: Vec<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Pipeline stage the error belongs to, for operator diagnostics
    pub fn stage(&self) -> &'static str {
        match self {
            Error::StreamNotFound { .. }
            | Error::AmbiguousStream { .. }
            | Error::MissingBiosignalStream { .. }
            | Error::StreamBind { .. } => "discovery",
            Error::StreamRead { .. } => "acquisition",
            Error::EmptyAcquisition | Error::ChannelMismatch { .. } => "assembly",
            Error::InvalidConfig(_) => "configuration",
            Error::Persistence { .. } => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let err = Error::StreamNotFound {
            name: "EEG".to_string(),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.stage(), "discovery");
        assert_eq!(Error::EmptyAcquisition.stage(), "assembly");
    }

    #[test]
    fn test_ambiguous_message_counts_names() {
        let err = Error::AmbiguousStream {
            kind: StreamKind::Biosignal,
            names: vec!["A".to_string(), "B".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("found 2"), "{}", msg);
        assert!(msg.contains("biosignal"), "{}", msg);
    }

    #[test]
    fn test_read_failure_message_shows_drop_log() {
        let err = Error::StreamRead {
            stream: "EEG".to_string(),
            sequence: 7,
            drop_log: vec![2, 5],
            source: InletError::Disconnected,
        };
        let msg = err.to_string();
        assert!(msg.contains("chunk 7"), "{}", msg);
        assert!(msg.contains("[2, 5]"), "{}", msg);
    }
}

//! Network stream abstraction
//!
//! This module contains the seam between the acquisition pipeline and the
//! pub/sub telemetry network that publishes the streams:
//! - Stream metadata and kind resolution ([`StreamInfo`], [`StreamKind`])
//! - The backend traits ([`StreamResolver`], [`StreamInlet`])
//! - Bound stream handles with scoped subscriptions ([`StreamHandle`])
//! - Discovery and cardinality checks ([`registry`])
//! - In-process backends ([`simulated`], [`scripted`]) and, with the `lsl`
//!   feature, the Lab Streaming Layer backend (`lsl_network`)

#[cfg(feature = "lsl")]
pub mod lsl_network;
pub mod registry;
pub mod scripted;
pub mod simulated;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stream type labels that identify discrete event streams
const MARKER_TYPE_LABELS: [&str; 5] = ["markers", "marker", "events", "event", "triggers"];

/// Errors reported by a stream backend
#[derive(Error, Debug)]
pub enum InletError {
    #[error("stream connection lost")]
    Disconnected,

    #[error("{0}")]
    Backend(String),
}

/// What a stream carries, resolved once at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Continuous, chunked physiological data (EEG, EMG, ...)
    Biosignal,
    /// Discrete, irregular event codes
    Marker,
}

impl StreamKind {
    /// Classify a stream from its published type label and nominal rate
    ///
    /// Irregular streams (nominal rate of zero) are always markers.
    ///
    /// # Example
    /// ```
    /// use neuroacq_core::stream::StreamKind;
    ///
    /// assert_eq!(StreamKind::from_type_label("EEG", 250.0), StreamKind::Biosignal);
    /// assert_eq!(StreamKind::from_type_label("Markers", 0.0), StreamKind::Marker);
    /// ```
    pub fn from_type_label(label: &str, nominal_rate_hz: f64) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if nominal_rate_hz <= 0.0 || MARKER_TYPE_LABELS.contains(&label.as_str()) {
            StreamKind::Marker
        } else {
            StreamKind::Biosignal
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Biosignal => write!(f, "biosignal"),
            StreamKind::Marker => write!(f, "marker"),
        }
    }
}

/// Metadata published by the discovery service for one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream name (the discovery key)
    pub name: String,
    /// Raw type label, e.g. "EEG" or "Markers"
    pub stream_type: String,
    /// Publisher-assigned source identifier
    pub source_id: String,
    /// Number of channels per sample
    pub channel_count: usize,
    /// Nominal sampling rate in Hz (0 for irregular streams)
    pub nominal_rate_hz: f64,
    /// Channel labels from the stream description (may be empty)
    pub channel_labels: Vec<String>,
}

impl StreamInfo {
    /// Kind derived from the type label and nominal rate
    pub fn kind(&self) -> StreamKind {
        StreamKind::from_type_label(&self.stream_type, self.nominal_rate_hz)
    }

    /// Channel labels, or `Ch1..ChN` when the description does not match
    /// the channel count
    pub fn labels_or_default(&self) -> Vec<String> {
        if self.channel_labels.len() == self.channel_count {
            self.channel_labels.clone()
        } else {
            (0..self.channel_count)
                .map(|i| format!("Ch{}", i + 1))
                .collect()
        }
    }
}

/// Samples returned by a single biosignal poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulledChunk {
    /// Sample-major values: `samples[i][ch]`
    pub samples: Vec<Vec<f32>>,
    /// One remote-clock timestamp per sample
    pub timestamps: Vec<f64>,
}

impl PulledChunk {
    /// Number of samples in the poll
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A single event read from a marker stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSample {
    /// Application-defined event code
    pub code: i32,
    /// Remote-clock timestamp
    pub timestamp: f64,
}

/// Live subscription to one stream
pub trait StreamInlet: Send {
    /// Pull up to `max_samples` biosignal samples
    ///
    /// Blocks until `max_samples` are available or `timeout` elapses and
    /// returns whatever arrived, which may be nothing.
    fn pull_chunk(
        &mut self,
        max_samples: usize,
        timeout: Duration,
    ) -> Result<PulledChunk, InletError>;

    /// Pull a single marker sample, waiting at most `timeout`
    fn pull_marker(&mut self, timeout: Duration) -> Result<Option<MarkerSample>, InletError>;

    /// Measure the offset (seconds) to add to remote timestamps to map them
    /// onto the local clock
    fn time_correction(&mut self, timeout: Duration) -> Result<f64, InletError>;

    /// Release the subscription
    fn close(&mut self);
}

/// Discovery side of a stream backend
pub trait StreamResolver {
    /// Resolve all streams published under `name`, waiting at most `timeout`
    fn resolve(&self, name: &str, timeout: Duration) -> Result<Vec<StreamInfo>, InletError>;

    /// Open a subscription to a resolved stream
    fn open(
        &self,
        info: &StreamInfo,
        max_chunk_len: usize,
    ) -> Result<Box<dyn StreamInlet>, InletError>;
}

impl<R: StreamResolver + ?Sized> StreamResolver for &R {
    fn resolve(&self, name: &str, timeout: Duration) -> Result<Vec<StreamInfo>, InletError> {
        (**self).resolve(name, timeout)
    }

    fn open(
        &self,
        info: &StreamInfo,
        max_chunk_len: usize,
    ) -> Result<Box<dyn StreamInlet>, InletError> {
        (**self).open(info, max_chunk_len)
    }
}

/// A named, typed connection to a remote stream
///
/// Everything but the clock offset is fixed at bind time. The subscription
/// is released exactly once, either through [`StreamHandle::release`] or on
/// drop.
pub struct StreamHandle {
    name: String,
    kind: StreamKind,
    channel_count: usize,
    nominal_rate_hz: f64,
    channel_labels: Vec<String>,
    clock_offset: f64,
    inlet: Option<Box<dyn StreamInlet>>,
}

impl StreamHandle {
    /// Bind a resolved stream to an open subscription and take the initial
    /// clock offset measurement
    ///
    /// A failed measurement is logged and leaves the offset at zero.
    pub fn bind(
        info: &StreamInfo,
        mut inlet: Box<dyn StreamInlet>,
        correction_timeout: Duration,
    ) -> Self {
        let clock_offset = match inlet.time_correction(correction_timeout) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!(
                    stream = %info.name,
                    error = %e,
                    "Initial clock offset measurement failed, assuming 0"
                );
                0.0
            }
        };

        let handle = Self {
            name: info.name.clone(),
            kind: info.kind(),
            channel_count: info.channel_count,
            nominal_rate_hz: info.nominal_rate_hz,
            channel_labels: info.labels_or_default(),
            clock_offset,
            inlet: Some(inlet),
        };

        tracing::info!(
            stream = %handle.name,
            kind = %handle.kind,
            channels = handle.channel_count,
            rate_hz = handle.nominal_rate_hz,
            clock_offset = handle.clock_offset,
            "Stream bound"
        );

        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn nominal_rate_hz(&self) -> f64 {
        self.nominal_rate_hz
    }

    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Latest measured offset between the stream clock and the local clock
    pub fn clock_offset(&self) -> f64 {
        self.clock_offset
    }

    /// Whether the subscription is still open
    pub fn is_bound(&self) -> bool {
        self.inlet.is_some()
    }

    pub(crate) fn inlet(&mut self) -> Result<&mut dyn StreamInlet, InletError> {
        match self.inlet.as_mut() {
            Some(inlet) => Ok(inlet.as_mut()),
            None => Err(InletError::Disconnected),
        }
    }

    /// Re-measure the clock offset; keeps the previous value on failure
    pub(crate) fn refresh_clock_offset(&mut self, timeout: Duration) {
        let Some(inlet) = self.inlet.as_mut() else {
            return;
        };
        match inlet.time_correction(timeout) {
            Ok(offset) => self.clock_offset = offset,
            Err(e) => {
                tracing::warn!(
                    stream = %self.name,
                    error = %e,
                    kept = self.clock_offset,
                    "Clock offset refresh failed"
                );
            }
        }
    }

    /// Close the subscription; later calls are no-ops
    pub fn release(&mut self) {
        if let Some(mut inlet) = self.inlet.take() {
            inlet.close();
            tracing::debug!(stream = %self.name, "Stream subscription released");
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("channel_count", &self.channel_count)
            .field("nominal_rate_hz", &self.nominal_rate_hz)
            .field("clock_offset", &self.clock_offset)
            .field("bound", &self.inlet.is_some())
            .finish()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

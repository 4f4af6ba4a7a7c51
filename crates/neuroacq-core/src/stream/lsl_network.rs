//! Lab Streaming Layer backend
//!
//! Resolves streams on the local network by name and subscribes through
//! liblsl inlets. LSL calls are blocking, which matches the polling loop.
//!
//! Requires the `lsl` feature (and a liblsl toolchain to build it).

use super::{InletError, MarkerSample, PulledChunk, StreamInfo, StreamInlet, StreamResolver};
use ::lsl::Pullable;
use std::time::{Duration, Instant};

/// Seconds of data liblsl buffers per inlet
const DEFAULT_BUFFER_SECS: i32 = 360;

/// Bound on re-resolving a stream when opening its inlet
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Streams published on the LSL network
#[derive(Debug, Clone)]
pub struct LslNetwork {
    buffer_secs: i32,
    open_timeout: Duration,
}

impl Default for LslNetwork {
    fn default() -> Self {
        Self {
            buffer_secs: DEFAULT_BUFFER_SECS,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

impl LslNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds of data each inlet buffers before the oldest samples are lost
    pub fn with_buffer_secs(mut self, secs: i32) -> Self {
        self.buffer_secs = secs.max(1);
        self
    }

    /// Every stream visible after waiting `wait`
    pub fn streams(&self, wait: Duration) -> Result<Vec<StreamInfo>, InletError> {
        let found = ::lsl::resolve_streams(wait.as_secs_f64()).map_err(backend)?;
        Ok(found.iter().map(convert_info).collect())
    }
}

impl StreamResolver for LslNetwork {
    fn resolve(&self, name: &str, timeout: Duration) -> Result<Vec<StreamInfo>, InletError> {
        let found = ::lsl::resolve_bypred(&name_predicate(name), 1, timeout.as_secs_f64())
            .map_err(backend)?;
        tracing::debug!(stream = %name, found = found.len(), "LSL resolve finished");
        Ok(found.iter().map(convert_info).collect())
    }

    fn open(
        &self,
        info: &StreamInfo,
        max_chunk_len: usize,
    ) -> Result<Box<dyn StreamInlet>, InletError> {
        let predicate = format!(
            "{} and {}",
            name_predicate(&info.name),
            property_predicate("source_id", &info.source_id)
        );
        let found = ::lsl::resolve_bypred(&predicate, 1, self.open_timeout.as_secs_f64())
            .map_err(backend)?;
        let target = found.first().ok_or(InletError::Disconnected)?;

        let max_chunk_len = i32::try_from(max_chunk_len).unwrap_or(i32::MAX);
        let inlet = ::lsl::StreamInlet::new(target, self.buffer_secs, max_chunk_len, true)
            .map_err(backend)?;
        inlet
            .open_stream(self.open_timeout.as_secs_f64())
            .map_err(backend)?;

        tracing::info!(
            stream = %info.name,
            source_id = %info.source_id,
            "LSL inlet opened"
        );

        Ok(Box::new(LslInlet {
            inlet: Some(inlet),
            channel_count: info.channel_count,
        }))
    }
}

struct LslInlet {
    inlet: Option<::lsl::StreamInlet>,
    channel_count: usize,
}

impl LslInlet {
    fn inlet(&self) -> Result<&::lsl::StreamInlet, InletError> {
        self.inlet.as_ref().ok_or(InletError::Disconnected)
    }
}

impl StreamInlet for LslInlet {
    fn pull_chunk(
        &mut self,
        max_samples: usize,
        timeout: Duration,
    ) -> Result<PulledChunk, InletError> {
        let inlet = self.inlet()?;
        let deadline = Instant::now() + timeout;
        let mut chunk = PulledChunk::default();

        while chunk.len() < max_samples {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (sample, timestamp): (Vec<f32>, f64) =
                inlet.pull_sample(remaining.as_secs_f64()).map_err(backend)?;
            // liblsl signals a timeout with a zero timestamp
            if timestamp == 0.0 {
                break;
            }
            if sample.len() != self.channel_count {
                tracing::trace!(
                    expected = self.channel_count,
                    got = sample.len(),
                    "LSL sample width differs from stream info"
                );
            }
            chunk.samples.push(sample);
            chunk.timestamps.push(timestamp);
            if remaining.is_zero() {
                break;
            }
        }
        Ok(chunk)
    }

    fn pull_marker(&mut self, timeout: Duration) -> Result<Option<MarkerSample>, InletError> {
        let inlet = self.inlet()?;
        let (sample, timestamp): (Vec<i32>, f64) =
            inlet.pull_sample(timeout.as_secs_f64()).map_err(backend)?;
        if timestamp == 0.0 {
            return Ok(None);
        }
        Ok(sample.first().map(|&code| MarkerSample { code, timestamp }))
    }

    fn time_correction(&mut self, timeout: Duration) -> Result<f64, InletError> {
        self.inlet()?
            .time_correction(timeout.as_secs_f64())
            .map_err(backend)
    }

    fn close(&mut self) {
        if let Some(inlet) = self.inlet.take() {
            inlet.close_stream();
        }
    }
}

fn backend(e: ::lsl::Error) -> InletError {
    InletError::Backend(format!("{:?}", e))
}

fn convert_info(info: &::lsl::StreamInfo) -> StreamInfo {
    let channel_count = usize::try_from(info.channel_count()).unwrap_or(0);
    let channel_labels = info
        .to_xml()
        .ok()
        .map(|xml| channel_labels(&xml))
        .unwrap_or_default();
    StreamInfo {
        name: info.stream_name(),
        stream_type: info.stream_type(),
        source_id: info.source_id(),
        channel_count,
        nominal_rate_hz: info.nominal_srate(),
        channel_labels,
    }
}

/// XPath predicate matching one property value
///
/// XPath 1.0 has no escapes, so values containing `'` are double-quoted.
fn property_predicate(property: &str, value: &str) -> String {
    if value.contains('\'') {
        format!("{}=\"{}\"", property, value)
    } else {
        format!("{}='{}'", property, value)
    }
}

fn name_predicate(name: &str) -> String {
    property_predicate("name", name)
}

/// `<label>` values from a stream description, in document order
fn channel_labels(xml: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<label>") {
        let after = &rest[start + "<label>".len()..];
        let Some(end) = after.find("</label>") else {
            break;
        };
        labels.push(after[..end].trim().to_string());
        rest = &after[end..];
    }
    labels
}

//! Scripted in-memory stream backend for deterministic playback
//!
//! Each [`ScriptedStream`] carries a queue of poll outcomes (full chunks,
//! short chunks, empty polls, failures) and a per-iteration queue of marker
//! samples. When a [`ManualClock`] is attached, every biosignal poll advances
//! it by a fixed cost, so duration-bounded loops run without sleeping.
//!
//! # Example
//! ```
//! use neuroacq_core::stream::scripted::{ScriptedNetwork, ScriptedStream};
//! use neuroacq_core::stream::StreamResolver;
//! use std::time::Duration;
//!
//! let net = ScriptedNetwork::new()
//!     .with_stream(ScriptedStream::biosignal("EEG", 8, 250.0).with_full_chunks(3, 25));
//! let found = net.resolve("EEG", Duration::from_secs(1)).unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].channel_count, 8);
//! ```

use super::{InletError, MarkerSample, PulledChunk, StreamInfo, StreamInlet, StreamResolver};
use crate::clock::ManualClock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default clock advance per biosignal poll
const DEFAULT_POLL_COST: Duration = Duration::from_millis(100);

/// Outcome of one scripted biosignal poll
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    /// Samples delivered by the poll
    Chunk(PulledChunk),
    /// Nothing arrived before the poll timeout
    Empty,
    /// Hard read failure
    Fail(String),
}

/// One stream with its scripted poll outcomes
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    info: StreamInfo,
    polls: VecDeque<ScriptedPoll>,
    markers: VecDeque<Option<MarkerSample>>,
    clock_offset: f64,
    /// Change in the reported offset after every clock correction
    clock_drift: f64,
    /// Chunks generated so far (seeds deterministic sample values)
    chunks_built: usize,
    /// Samples generated so far (seeds timestamps)
    samples_built: usize,
}

impl ScriptedStream {
    /// Stream with arbitrary metadata and an empty script
    pub fn with_info(info: StreamInfo) -> Self {
        Self {
            info,
            polls: VecDeque::new(),
            markers: VecDeque::new(),
            clock_offset: 0.0,
            clock_drift: 0.0,
            chunks_built: 0,
            samples_built: 0,
        }
    }

    /// EEG-typed biosignal stream
    pub fn biosignal(name: &str, channel_count: usize, nominal_rate_hz: f64) -> Self {
        Self::with_info(StreamInfo {
            name: name.to_string(),
            stream_type: "EEG".to_string(),
            source_id: format!("scripted-{}", name),
            channel_count,
            nominal_rate_hz,
            channel_labels: Vec::new(),
        })
    }

    /// Irregular marker stream
    pub fn markers(name: &str) -> Self {
        Self::with_info(StreamInfo {
            name: name.to_string(),
            stream_type: "Markers".to_string(),
            source_id: format!("scripted-{}", name),
            channel_count: 1,
            nominal_rate_hz: 0.0,
            channel_labels: Vec::new(),
        })
    }

    /// Deterministic value of channel `channel` in sample `sample` of the
    /// `chunk`-th scripted chunk (0-based, counting short chunks too)
    pub fn sample_value(chunk: usize, sample: usize, channel: usize) -> f32 {
        (chunk * 100_000 + sample * 100 + channel) as f32
    }

    /// Append a poll that delivers `len` samples
    pub fn with_chunk(mut self, len: usize) -> Self {
        let width = self.info.channel_count;
        let chunk = self.build_chunk(len, width);
        self.polls.push_back(ScriptedPoll::Chunk(chunk));
        self
    }

    /// Append a poll whose samples carry `width` values instead of the
    /// advertised channel count
    pub fn with_chunk_of_width(mut self, len: usize, width: usize) -> Self {
        let chunk = self.build_chunk(len, width);
        self.polls.push_back(ScriptedPoll::Chunk(chunk));
        self
    }

    /// Append `count` polls that each deliver a full chunk
    pub fn with_full_chunks(mut self, count: usize, chunk_size: usize) -> Self {
        for _ in 0..count {
            self = self.with_chunk(chunk_size);
        }
        self
    }

    /// Append `count` polls that time out without data
    pub fn with_empty_polls(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.polls.push_back(ScriptedPoll::Empty);
        }
        self
    }

    /// Append a poll that fails hard
    pub fn with_failure(mut self, reason: &str) -> Self {
        self.polls.push_back(ScriptedPoll::Fail(reason.to_string()));
        self
    }

    /// Deliver a marker on the given 1-based marker poll
    pub fn with_marker_at(mut self, poll: usize, code: i32) -> Self {
        let index = poll.saturating_sub(1);
        while self.markers.len() <= index {
            self.markers.push_back(None);
        }
        self.markers[index] = Some(MarkerSample {
            code,
            timestamp: poll as f64 * 0.1,
        });
        self
    }

    /// Offset reported by every clock correction
    pub fn with_clock_offset(mut self, offset: f64) -> Self {
        self.clock_offset = offset;
        self
    }

    /// Grow the reported offset by `per_call` after every clock correction
    pub fn with_clock_drift(mut self, per_call: f64) -> Self {
        self.clock_drift = per_call;
        self
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn build_chunk(&mut self, len: usize, width: usize) -> PulledChunk {
        let rate = if self.info.nominal_rate_hz > 0.0 {
            self.info.nominal_rate_hz
        } else {
            1.0
        };
        let chunk = self.chunks_built;
        let samples = (0..len)
            .map(|i| {
                (0..width)
                    .map(|ch| Self::sample_value(chunk, i, ch))
                    .collect()
            })
            .collect();
        let timestamps = (0..len)
            .map(|i| (self.samples_built + i) as f64 / rate)
            .collect();

        self.chunks_built += 1;
        self.samples_built += len;
        PulledChunk {
            samples,
            timestamps,
        }
    }
}

/// In-memory network of scripted streams
#[derive(Debug)]
pub struct ScriptedNetwork {
    infos: Vec<StreamInfo>,
    streams: Mutex<Vec<Option<ScriptedStream>>>,
    clock: Option<ManualClock>,
    poll_cost: Duration,
    closes: Arc<AtomicUsize>,
    biosignal_polls: Arc<AtomicUsize>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self {
            infos: Vec::new(),
            streams: Mutex::new(Vec::new()),
            clock: None,
            poll_cost: DEFAULT_POLL_COST,
            closes: Arc::new(AtomicUsize::new(0)),
            biosignal_polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish a scripted stream
    pub fn with_stream(mut self, stream: ScriptedStream) -> Self {
        self.infos.push(stream.info.clone());
        if let Ok(streams) = self.streams.get_mut() {
            streams.push(Some(stream));
        }
        self
    }

    /// Advance `clock` by `poll_cost` on every biosignal poll
    pub fn with_clock(mut self, clock: ManualClock, poll_cost: Duration) -> Self {
        self.clock = Some(clock);
        self.poll_cost = poll_cost;
        self
    }

    /// Counter of `close()` calls across all subscriptions
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    /// Counter of biosignal polls across all subscriptions
    pub fn poll_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.biosignal_polls)
    }
}

impl Default for ScriptedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamResolver for ScriptedNetwork {
    fn resolve(&self, name: &str, _timeout: Duration) -> Result<Vec<StreamInfo>, InletError> {
        Ok(self
            .infos
            .iter()
            .filter(|info| info.name == name)
            .cloned()
            .collect())
    }

    fn open(
        &self,
        info: &StreamInfo,
        _max_chunk_len: usize,
    ) -> Result<Box<dyn StreamInlet>, InletError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| InletError::Backend("scripted network poisoned".to_string()))?;

        let stream = streams
            .iter_mut()
            .find(|s| matches!(s, Some(stream) if &stream.info == info))
            .and_then(Option::take)
            .ok_or_else(|| {
                InletError::Backend(format!("stream '{}' already subscribed", info.name))
            })?;

        Ok(Box::new(ScriptedInlet {
            polls: stream.polls,
            markers: stream.markers,
            clock_offset: stream.clock_offset,
            clock_drift: stream.clock_drift,
            clock: self.clock.clone(),
            poll_cost: self.poll_cost,
            closes: Arc::clone(&self.closes),
            biosignal_polls: Arc::clone(&self.biosignal_polls),
            closed: false,
        }))
    }
}

struct ScriptedInlet {
    polls: VecDeque<ScriptedPoll>,
    markers: VecDeque<Option<MarkerSample>>,
    clock_offset: f64,
    clock_drift: f64,
    clock: Option<ManualClock>,
    poll_cost: Duration,
    closes: Arc<AtomicUsize>,
    biosignal_polls: Arc<AtomicUsize>,
    closed: bool,
}

impl StreamInlet for ScriptedInlet {
    fn pull_chunk(
        &mut self,
        max_samples: usize,
        _timeout: Duration,
    ) -> Result<PulledChunk, InletError> {
        if self.closed {
            return Err(InletError::Disconnected);
        }
        self.biosignal_polls.fetch_add(1, Ordering::SeqCst);
        match &self.clock {
            Some(clock) => clock.advance(self.poll_cost),
            None => std::thread::sleep(Duration::from_millis(1)),
        }

        match self.polls.pop_front() {
            Some(ScriptedPoll::Chunk(mut chunk)) => {
                chunk.samples.truncate(max_samples);
                chunk.timestamps.truncate(max_samples);
                Ok(chunk)
            }
            Some(ScriptedPoll::Empty) | None => Ok(PulledChunk::default()),
            Some(ScriptedPoll::Fail(reason)) => Err(InletError::Backend(reason)),
        }
    }

    fn pull_marker(&mut self, _timeout: Duration) -> Result<Option<MarkerSample>, InletError> {
        if self.closed {
            return Err(InletError::Disconnected);
        }
        Ok(self.markers.pop_front().flatten())
    }

    fn time_correction(&mut self, _timeout: Duration) -> Result<f64, InletError> {
        let offset = self.clock_offset;
        self.clock_offset += self.clock_drift;
        Ok(offset)
    }

    fn close(&mut self) {
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

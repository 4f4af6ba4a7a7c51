//! In-memory buffers filled by the acquisition loop
//!
//! Everything here is owned by the loop thread while acquisition runs and is
//! read-only once the [`AcquisitionRecord`] is handed back.

use crate::assembler::{self, AcquisitionResult};
use crate::error::Result;
use serde::Serialize;
use std::time::Duration;

/// A complete batch of biosignal samples pulled in one poll
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-based loop iteration that produced the chunk
    pub sequence_number: u64,
    /// Sample-major values: `samples[i][ch]`
    pub samples: Vec<Vec<f32>>,
    /// Remote-clock timestamp per sample
    pub timestamps: Vec<f64>,
    /// Stream clock offset measured when the chunk was buffered
    pub clock_offset: f64,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample timestamps mapped onto the local clock
    pub fn local_timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.timestamps.iter().map(move |t| t + self.clock_offset)
    }
}

/// A discrete event read from the marker stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerEvent {
    /// Sequence number of the biosignal chunk in flight when the marker
    /// arrived
    pub chunk_index: u64,
    pub code: i32,
    /// Local-clock timestamp
    pub timestamp: f64,
}

/// Sequence numbers of polls that did not deliver a full chunk
///
/// Append-only; entries are strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DropLog(Vec<u64>);

impl DropLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dropped sequence number
    ///
    /// Out-of-order entries are ignored with a warning so the log stays
    /// strictly increasing.
    pub fn record(&mut self, sequence_number: u64) {
        if let Some(&last) = self.0.last() {
            if sequence_number <= last {
                tracing::warn!(
                    sequence = sequence_number,
                    last,
                    "Ignoring out-of-order drop log entry"
                );
                return;
            }
        }
        self.0.push(sequence_number);
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, sequence_number: u64) -> bool {
        self.0.binary_search(&sequence_number).is_ok()
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.0
    }
}

/// Everything the acquisition loop buffered, before assembly
#[derive(Debug, Clone)]
pub struct AcquisitionRecord {
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) events: Vec<MarkerEvent>,
    pub(crate) drop_log: DropLog,
    pub(crate) chunk_size: usize,
    pub(crate) channel_count: usize,
    pub(crate) elapsed: Duration,
    pub(crate) iterations: u64,
    pub(crate) interrupted: bool,
}

impl AcquisitionRecord {
    /// Buffered complete chunks, in sequence order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Marker events, in arrival order
    pub fn events(&self) -> &[MarkerEvent] {
        &self.events
    }

    pub fn drop_log(&self) -> &DropLog {
        &self.drop_log
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Wall-clock time spent in the loop
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Iterations that polled and got data (sequence numbers handed out)
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Whether the loop ended on the stop signal rather than the duration
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Samples held in complete chunks
    pub fn total_samples(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Build the channel-major result
    ///
    /// # Errors
    /// [`crate::Error::EmptyAcquisition`] if no complete chunk was buffered
    pub fn assemble(&self) -> Result<AcquisitionResult> {
        let (raw_matrix, events) =
            assembler::assemble(&self.chunks, &self.events, self.chunk_size)?;

        Ok(AcquisitionResult {
            raw_matrix,
            events,
            drop_log: self.drop_log.as_slice().to_vec(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            sample_times: assembler::sample_times(&self.chunks),
            chunk_size: self.chunk_size,
            complete_chunks: self.chunks.len(),
            interrupted: self.interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_log_stays_increasing() {
        let mut log = DropLog::new();
        log.record(3);
        log.record(7);
        log.record(5);
        log.record(7);
        assert_eq!(log.as_slice(), &[3, 7]);
        assert!(log.contains(7));
        assert!(!log.contains(5));
    }

    #[test]
    fn test_local_timestamps_apply_offset() {
        let chunk = Chunk {
            sequence_number: 1,
            samples: vec![vec![0.0]; 2],
            timestamps: vec![10.0, 10.5],
            clock_offset: -2.0,
        };
        let local: Vec<f64> = chunk.local_timestamps().collect();
        assert_eq!(local, vec![8.0, 8.5]);
    }

    #[test]
    fn test_drop_log_serializes_as_list() {
        let mut log = DropLog::new();
        log.record(11);
        assert_eq!(serde_json::to_string(&log).unwrap(), "[11]");
    }
}

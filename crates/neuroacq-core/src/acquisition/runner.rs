//! Duration-bounded polling loop over the bound streams
//!
//! One thread, strictly sequential per iteration:
//! 1. Biosignal poll for up to `chunk_size` samples (bounded timeout)
//! 2. Empty poll: no-op iteration, poll again
//! 3. Short poll: sequence number goes to the drop log, samples are discarded
//! 4. Full poll: chunk is buffered and the stream clock offset refreshed
//! 5. One non-blocking marker poll, tagged with the current sequence number
//! 6. Sequence number advances

use super::buffer::{AcquisitionRecord, Chunk, DropLog, MarkerEvent};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::stream::StreamHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Acquisition loop parameters
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Wall-clock bound on the loop
    pub duration: Duration,
    /// Samples per complete chunk
    pub chunk_size: usize,
    /// Bound on each biosignal poll
    pub poll_timeout: Duration,
    /// Bound on each clock offset refresh
    pub correction_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            poll_timeout: Duration::from_secs_f64(crate::DEFAULT_POLL_TIMEOUT_SECS),
            correction_timeout: Duration::from_millis(100),
        }
    }
}

/// Cloneable operator interrupt flag
///
/// # Example
/// ```
/// use neuroacq_core::StopSignal;
///
/// let stop = StopSignal::new();
/// let handler_side = stop.clone();
/// handler_side.trigger();
/// assert!(stop.is_triggered());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop at the next check
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives one acquisition session on the calling thread
pub struct AcquisitionLoop<'a> {
    config: AcquisitionConfig,
    clock: &'a dyn Clock,
    stop: StopSignal,
}

impl<'a> AcquisitionLoop<'a> {
    /// # Arguments
    /// * `config` - Duration, chunk size and poll bounds
    /// * `clock` - Monotonic time source for the duration bound
    /// * `stop` - Operator interrupt
    pub fn new(config: AcquisitionConfig, clock: &'a dyn Clock, stop: StopSignal) -> Self {
        Self {
            config,
            clock,
            stop,
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Poll the streams until the duration expires or the stop signal fires
    ///
    /// Both subscriptions are released before returning, on success and on
    /// failure.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] for a zero chunk size
    /// - [`Error::StreamRead`] if the biosignal stream cannot be polled; it
    ///   carries the drop log accumulated so far
    pub fn run(
        &self,
        biosignal: &mut StreamHandle,
        mut marker: Option<&mut StreamHandle>,
    ) -> Result<AcquisitionRecord> {
        let result = self.poll_streams(biosignal, marker.as_deref_mut());
        biosignal.release();
        if let Some(m) = marker {
            m.release();
        }
        result
    }

    fn poll_streams(
        &self,
        biosignal: &mut StreamHandle,
        mut marker: Option<&mut StreamHandle>,
    ) -> Result<AcquisitionRecord> {
        let chunk_size = self.config.chunk_size;
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".to_string()));
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut events: Vec<MarkerEvent> = Vec::new();
        let mut drop_log = DropLog::new();
        let mut sequence: u64 = 1;
        let mut interrupted = false;

        tracing::info!(
            stream = %biosignal.name(),
            marker = marker.as_ref().map(|m| m.name()).unwrap_or("-"),
            duration_s = self.config.duration.as_secs_f64(),
            chunk_size,
            "Acquisition started"
        );

        let t_start = self.clock.now();
        loop {
            if self.stop.is_triggered() {
                interrupted = true;
                break;
            }
            if self.clock.now().saturating_sub(t_start) >= self.config.duration {
                break;
            }

            let poll_timeout = self.config.poll_timeout;
            let pulled = match biosignal
                .inlet()
                .and_then(|inlet| inlet.pull_chunk(chunk_size, poll_timeout))
            {
                Ok(pulled) => pulled,
                Err(source) => {
                    tracing::error!(
                        stream = %biosignal.name(),
                        sequence,
                        error = %source,
                        "Biosignal poll failed"
                    );
                    return Err(Error::StreamRead {
                        stream: biosignal.name().to_string(),
                        sequence,
                        drop_log: drop_log.into_vec(),
                        source,
                    });
                }
            };

            // A poll that completes after the interrupt is not buffered
            if self.stop.is_triggered() {
                tracing::debug!(sequence, samples = pulled.len(), "Discarding poll after stop");
                interrupted = true;
                break;
            }

            if pulled.is_empty() {
                tracing::trace!(sequence, "Empty poll");
                continue;
            }

            let channel_count = biosignal.channel_count();
            let bad_width = pulled
                .samples
                .iter()
                .map(Vec::len)
                .find(|&width| width != channel_count);
            if pulled.len() != chunk_size {
                tracing::warn!(
                    stream = %biosignal.name(),
                    sequence,
                    expected = chunk_size,
                    got = pulled.len(),
                    "Dropped short chunk"
                );
                drop_log.record(sequence);
            } else if let Some(width) = bad_width {
                tracing::warn!(
                    stream = %biosignal.name(),
                    sequence,
                    expected = channel_count,
                    got = width,
                    "Dropped chunk with wrong sample width"
                );
                drop_log.record(sequence);
            } else {
                biosignal.refresh_clock_offset(self.config.correction_timeout);
                chunks.push(Chunk {
                    sequence_number: sequence,
                    samples: pulled.samples,
                    timestamps: pulled.timestamps,
                    clock_offset: biosignal.clock_offset(),
                });
                tracing::trace!(sequence, "Chunk buffered");
            }

            let correction_timeout = self.config.correction_timeout;
            let marker_lost = match marker.as_deref_mut() {
                Some(m) => !poll_marker(m, sequence, correction_timeout, &mut events),
                None => false,
            };
            if marker_lost {
                marker = None;
            }

            sequence += 1;
        }

        let elapsed = self.clock.now().saturating_sub(t_start);
        let record = AcquisitionRecord {
            chunks,
            events,
            drop_log,
            chunk_size,
            channel_count: biosignal.channel_count(),
            elapsed,
            iterations: sequence - 1,
            interrupted,
        };

        tracing::info!(
            chunks = record.chunks.len(),
            dropped = record.drop_log.len(),
            markers = record.events.len(),
            samples = record.total_samples(),
            elapsed_s = elapsed.as_secs_f64(),
            interrupted,
            "Acquisition stopped"
        );

        Ok(record)
    }
}

/// Non-blocking read of one marker sample
///
/// The marker clock offset is re-measured before it is applied to a received
/// sample. Returns `false` if the marker stream failed and has been released.
fn poll_marker(
    marker: &mut StreamHandle,
    sequence: u64,
    correction_timeout: Duration,
    events: &mut Vec<MarkerEvent>,
) -> bool {
    match marker
        .inlet()
        .and_then(|inlet| inlet.pull_marker(Duration::ZERO))
    {
        Ok(Some(sample)) => {
            marker.refresh_clock_offset(correction_timeout);
            tracing::debug!(code = sample.code, chunk = sequence, "Marker received");
            events.push(MarkerEvent {
                chunk_index: sequence,
                code: sample.code,
                timestamp: sample.timestamp + marker.clock_offset(),
            });
            true
        }
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(
                stream = %marker.name(),
                error = %e,
                "Marker stream failed, continuing without markers"
            );
            marker.release();
            false
        }
    }
}

//! Chunk-to-matrix assembly
//!
//! Turns the sample-major chunks buffered by the acquisition loop into one
//! channel-major matrix (`channels × samples`) and attaches an approximate
//! onset sample to each marker event.
//!
//! ## Alignment
//!
//! A marker's `sample_index` is `chunk_index × chunk_size`. Sequence numbers
//! start at 1, so with no drops this is the first sample of the chunk
//! *after* the one buffered in the marker's iteration. Every dropped chunk
//! before the marker moves it a further `chunk_size` samples past the
//! matrix column it would otherwise name. It is an approximate onset only.

use crate::acquisition::{Chunk, MarkerEvent};
use crate::error::{Error, Result};
use ndarray::{s, Array2};
use serde::Serialize;

/// Channel-major sample matrix: `matrix[[channel, sample]]`
pub type SampleMatrix = Array2<f32>;

/// A marker event with its approximate onset sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignedEvent {
    pub chunk_index: u64,
    pub code: i32,
    pub timestamp: f64,
    /// `chunk_index × chunk_size`; approximate onset, not sample-exact
    pub sample_index: usize,
}

impl AlignedEvent {
    /// Attach the approximate onset sample to a marker event
    pub fn from_marker(event: &MarkerEvent, chunk_size: usize) -> Self {
        Self {
            chunk_index: event.chunk_index,
            code: event.code,
            timestamp: event.timestamp,
            sample_index: event.chunk_index as usize * chunk_size,
        }
    }
}

/// Assemble buffered chunks into a channel-major matrix
///
/// Chunks are concatenated in sequence order along the sample axis;
/// `matrix[.., k*chunk_size..(k+1)*chunk_size]` is the transpose of chunk
/// `k`. Pure and deterministic.
///
/// # Arguments
/// * `chunks` - Complete chunks in sequence order
/// * `events` - Marker events in arrival order
/// * `chunk_size` - Samples per complete chunk
///
/// # Errors
/// - [`Error::EmptyAcquisition`] when `chunks` is empty
/// - [`Error::ChannelMismatch`] when a sample's width differs from the first
///   chunk's
///
/// # Example
/// ```
/// use neuroacq_core::acquisition::Chunk;
/// use neuroacq_core::assemble;
///
/// let chunk = Chunk {
///     sequence_number: 1,
///     samples: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
///     timestamps: vec![0.0, 0.5],
///     clock_offset: 0.0,
/// };
/// let (matrix, _) = assemble(&[chunk], &[], 2).unwrap();
/// assert_eq!(matrix.dim(), (2, 2));
/// assert_eq!(matrix[[1, 0]], 2.0);
/// ```
pub fn assemble(
    chunks: &[Chunk],
    events: &[MarkerEvent],
    chunk_size: usize,
) -> Result<(SampleMatrix, Vec<AlignedEvent>)> {
    let first = chunks.first().ok_or(Error::EmptyAcquisition)?;
    let channel_count = first.samples.first().map(Vec::len).unwrap_or(0);
    let total_samples: usize = chunks.iter().map(Chunk::len).sum();

    let mut matrix = SampleMatrix::zeros((channel_count, total_samples));
    let mut column = 0;
    for chunk in chunks {
        for sample in &chunk.samples {
            if sample.len() != channel_count {
                return Err(Error::ChannelMismatch {
                    expected: channel_count,
                    actual: sample.len(),
                });
            }
            for (ch, &value) in sample.iter().enumerate() {
                matrix[[ch, column]] = value;
            }
            column += 1;
        }
    }

    let aligned = events
        .iter()
        .map(|e| AlignedEvent::from_marker(e, chunk_size))
        .collect();

    tracing::debug!(
        channels = channel_count,
        samples = total_samples,
        chunks = chunks.len(),
        events = events.len(),
        "Assembled sample matrix"
    );

    Ok((matrix, aligned))
}

/// Local-clock timestamp of every matrix column
pub fn sample_times(chunks: &[Chunk]) -> Vec<f64> {
    chunks.iter().flat_map(|c| c.local_timestamps()).collect()
}

/// Replace jittery timestamps with a least-squares line `t = a + b·i`
///
/// Fewer than two timestamps are returned unchanged.
pub fn dejitter_timestamps(times: &[f64]) -> Vec<f64> {
    let n = times.len();
    if n < 2 {
        return times.to_vec();
    }

    let nf = n as f64;
    let mean_i = (nf - 1.0) / 2.0;
    let mean_t = times.iter().sum::<f64>() / nf;

    let (mut cov, mut var) = (0.0, 0.0);
    for (i, &t) in times.iter().enumerate() {
        let di = i as f64 - mean_i;
        cov += di * (t - mean_t);
        var += di * di;
    }
    let slope = cov / var;
    let intercept = mean_t - slope * mean_i;

    (0..n).map(|i| intercept + slope * i as f64).collect()
}

/// Immutable outcome of one acquisition session
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    pub(crate) raw_matrix: SampleMatrix,
    pub(crate) events: Vec<AlignedEvent>,
    pub(crate) drop_log: Vec<u64>,
    pub(crate) elapsed_seconds: f64,
    pub(crate) sample_times: Vec<f64>,
    pub(crate) chunk_size: usize,
    pub(crate) complete_chunks: usize,
    pub(crate) interrupted: bool,
}

impl AcquisitionResult {
    /// `channels × samples` matrix
    pub fn raw_matrix(&self) -> &SampleMatrix {
        &self.raw_matrix
    }

    pub fn events(&self) -> &[AlignedEvent] {
        &self.events
    }

    pub fn drop_log(&self) -> &[u64] {
        &self.drop_log
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn total_samples(&self) -> usize {
        self.raw_matrix.ncols()
    }

    pub fn channel_count(&self) -> usize {
        self.raw_matrix.nrows()
    }

    /// Local-clock timestamp per matrix column
    pub fn sample_times(&self) -> &[f64] {
        &self.sample_times
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn complete_chunks(&self) -> usize {
        self.complete_chunks
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Columns `[start, end)` of the matrix
    pub fn samples_between(&self, start: usize, end: usize) -> ndarray::ArrayView2<'_, f32> {
        let end = end.min(self.total_samples());
        let start = start.min(end);
        self.raw_matrix.slice(s![.., start..end])
    }

    /// Copy of the result with least-squares fitted sample times
    pub fn dejittered(&self) -> Self {
        Self {
            sample_times: dejitter_timestamps(&self.sample_times),
            ..self.clone()
        }
    }
}

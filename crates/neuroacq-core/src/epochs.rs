//! Event-locked epoch extraction
//!
//! Cuts a fixed window around each aligned marker onset out of the raw
//! matrix, producing an `epochs × channels × times` array.

use crate::assembler::{AlignedEvent, SampleMatrix};
use crate::error::{Error, Result};
use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};

/// Epoch window relative to the event onset, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochWindow {
    pub tmin: f64,
    pub tmax: f64,
}

impl Default for EpochWindow {
    fn default() -> Self {
        Self {
            tmin: -0.2,
            tmax: 0.5,
        }
    }
}

impl EpochWindow {
    pub fn new(tmin: f64, tmax: f64) -> Self {
        Self { tmin, tmax }
    }

    /// Window bounds in samples relative to the onset (both inclusive)
    pub fn sample_offsets(&self, sample_rate: f64) -> (i64, i64) {
        (
            (self.tmin * sample_rate).round() as i64,
            (self.tmax * sample_rate).round() as i64,
        )
    }
}

/// Epochs cut from one acquisition
#[derive(Debug, Clone)]
pub struct Epochs {
    data: Array3<f32>,
    events: Vec<AlignedEvent>,
    skipped: Vec<usize>,
    window: EpochWindow,
    sample_rate: f64,
}

impl Epochs {
    /// `epochs × channels × times`
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Events that produced an epoch, in order
    pub fn events(&self) -> &[AlignedEvent] {
        &self.events
    }

    /// Positions (in the input event list) of events whose window fell
    /// outside the recording
    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }

    pub fn window(&self) -> EpochWindow {
        self.window
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.data.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per epoch
    pub fn n_times(&self) -> usize {
        self.data.dim().2
    }
}

/// Slice an epoch around every event onset
///
/// Each epoch spans `[onset + round(tmin·sfreq), onset + round(tmax·sfreq)]`
/// inclusive. Events whose window does not fit in the matrix are skipped.
///
/// # Errors
/// [`Error::InvalidConfig`] for a non-positive sample rate or `tmax < tmin`
pub fn extract_epochs(
    matrix: &SampleMatrix,
    events: &[AlignedEvent],
    sample_rate: f64,
    window: EpochWindow,
) -> Result<Epochs> {
    if sample_rate.is_nan() || sample_rate <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "sample rate must be positive, got {}",
            sample_rate
        )));
    }
    if window.tmax < window.tmin {
        return Err(Error::InvalidConfig(format!(
            "epoch window is inverted: tmin {} > tmax {}",
            window.tmin, window.tmax
        )));
    }

    let (first, last) = window.sample_offsets(sample_rate);
    let n_times = (last - first + 1) as usize;
    let (n_channels, n_samples) = matrix.dim();

    let mut kept = Vec::new();
    let mut skipped = Vec::new();
    for (i, event) in events.iter().enumerate() {
        let start = event.sample_index as i64 + first;
        let end = event.sample_index as i64 + last;
        if start < 0 || end >= n_samples as i64 {
            tracing::debug!(
                code = event.code,
                sample = event.sample_index,
                "Epoch window outside recording, skipped"
            );
            skipped.push(i);
        } else {
            kept.push((*event, start as usize));
        }
    }

    let mut data = Array3::<f32>::zeros((kept.len(), n_channels, n_times));
    for (e, (_, start)) in kept.iter().enumerate() {
        data.slice_mut(s![e, .., ..])
            .assign(&matrix.slice(s![.., *start..*start + n_times]));
    }

    if !skipped.is_empty() {
        tracing::warn!(
            kept = kept.len(),
            skipped = skipped.len(),
            "Some events fell outside the recording"
        );
    }

    Ok(Epochs {
        data,
        events: kept.into_iter().map(|(event, _)| event).collect(),
        skipped,
        window,
        sample_rate,
    })
}

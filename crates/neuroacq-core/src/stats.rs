//! Per-session acquisition statistics
//!
//! Summarizes how well the biosignal stream kept up: complete vs dropped
//! chunks, effective sample rate against the nominal one, and marker count.

use crate::acquisition::AcquisitionRecord;
use crate::assembler::AcquisitionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics for one acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// When the summary was computed
    pub created_at: DateTime<Utc>,
    pub complete_chunks: usize,
    pub dropped_chunks: usize,
    /// Dropped / (complete + dropped); 0 when nothing was polled
    pub drop_ratio: f64,
    pub drop_log: Vec<u64>,
    pub total_samples: usize,
    pub channel_count: usize,
    pub elapsed_seconds: f64,
    pub nominal_rate_hz: f64,
    /// Samples kept per second of acquisition
    pub effective_rate_hz: f64,
    pub marker_count: usize,
    pub interrupted: bool,
}

impl SessionSummary {
    /// Summarize an assembled result
    ///
    /// # Arguments
    /// * `result` - Assembled acquisition
    /// * `nominal_rate_hz` - Rate the stream advertised
    pub fn from_result(result: &AcquisitionResult, nominal_rate_hz: f64) -> Self {
        Self::build(
            result.complete_chunks(),
            result.drop_log().to_vec(),
            result.total_samples(),
            result.channel_count(),
            result.elapsed_seconds(),
            nominal_rate_hz,
            result.events().len(),
            result.interrupted(),
        )
    }

    /// Summarize a raw record, including one with no complete chunk
    pub fn from_record(record: &AcquisitionRecord, nominal_rate_hz: f64) -> Self {
        Self::build(
            record.chunks().len(),
            record.drop_log().as_slice().to_vec(),
            record.total_samples(),
            record.channel_count(),
            record.elapsed().as_secs_f64(),
            nominal_rate_hz,
            record.events().len(),
            record.interrupted(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        complete_chunks: usize,
        drop_log: Vec<u64>,
        total_samples: usize,
        channel_count: usize,
        elapsed_seconds: f64,
        nominal_rate_hz: f64,
        marker_count: usize,
        interrupted: bool,
    ) -> Self {
        let polled = complete_chunks + drop_log.len();
        let drop_ratio = if polled > 0 {
            drop_log.len() as f64 / polled as f64
        } else {
            0.0
        };
        let effective_rate_hz = if elapsed_seconds > 0.0 {
            total_samples as f64 / elapsed_seconds
        } else {
            0.0
        };

        Self {
            created_at: Utc::now(),
            complete_chunks,
            dropped_chunks: drop_log.len(),
            drop_ratio,
            drop_log,
            total_samples,
            channel_count,
            elapsed_seconds,
            nominal_rate_hz,
            effective_rate_hz,
            marker_count,
            interrupted,
        }
    }

    /// Whether no chunk was dropped
    pub fn is_clean(&self) -> bool {
        self.dropped_chunks == 0
    }

    /// Log the summary at info level
    pub fn log(&self) {
        tracing::info!(
            complete = self.complete_chunks,
            dropped = self.dropped_chunks,
            drop_ratio = format!("{:.2}%", self.drop_ratio * 100.0),
            samples = self.total_samples,
            elapsed_s = format!("{:.2}", self.elapsed_seconds),
            effective_hz = format!("{:.1}", self.effective_rate_hz),
            nominal_hz = self.nominal_rate_hz,
            markers = self.marker_count,
            interrupted = self.interrupted,
            "Session summary"
        );
        if !self.is_clean() {
            tracing::warn!(drop_log = ?self.drop_log, "Chunks were dropped");
        }
    }
}

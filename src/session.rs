//! One recording session, end to end
//!
//! Discover → acquire → assemble → save, with each stage's failure wrapped
//! in context naming the stage.

use crate::config::SessionConfig;
use anyhow::{Context, Result};
use neuroacq_core::clock::Clock;
use neuroacq_core::stream::StreamResolver;
use neuroacq_core::{AcquisitionLoop, Persister, SessionSummary, StopSignal, StreamRegistry};
use std::path::PathBuf;

/// What a completed session produced
#[derive(Debug)]
pub struct SessionOutcome {
    pub summary: SessionSummary,
    /// Written files in write order
    pub written: Vec<PathBuf>,
    /// Channel names used in the outputs
    pub channel_names: Vec<String>,
    /// Sample rate recorded in the outputs
    pub sample_rate: f64,
}

/// Run a full session against a stream backend
///
/// # Arguments
/// * `config` - Session identity and acquisition parameters
/// * `resolver` - Stream network backend
/// * `clock` - Time source for the acquisition duration
/// * `stop` - Operator interrupt; a triggered stop still assembles and saves
///   what was buffered
pub fn run_session<R: StreamResolver>(
    config: &SessionConfig,
    resolver: R,
    clock: &dyn Clock,
    stop: StopSignal,
) -> Result<SessionOutcome> {
    config.validate().context("Invalid session configuration")?;

    let registry = StreamRegistry::new(resolver, config.chunk_size);
    let mut streams = registry
        .discover(config.stream_names(), config.resolve_timeout())
        .context("Stream discovery failed")?;

    let channel_names = if config.channel_names.is_empty() {
        streams.biosignal().channel_labels().to_vec()
    } else {
        config.channel_names.clone()
    };
    let nominal_rate = streams.biosignal().nominal_rate_hz();
    let sample_rate = config.sample_rate.unwrap_or(nominal_rate);

    let record = {
        let (biosignal, marker) = streams.split_mut();
        AcquisitionLoop::new(config.acquisition(), clock, stop)
            .run(biosignal, marker)
            .context("Acquisition failed")?
    };
    streams.release();

    let result = match record.assemble() {
        Ok(result) => result,
        Err(e) => {
            SessionSummary::from_record(&record, nominal_rate).log();
            return Err(e).context("Assembly failed");
        }
    };
    let result = if config.dejitter {
        tracing::info!("Dejittering sample timestamps");
        result.dejittered()
    } else {
        result
    };

    let written = Persister::new(&config.output_dir)
        .with_epoch_window(config.epoch_window())
        .with_nominal_rate(nominal_rate)
        .save(
            &result,
            &channel_names,
            &config.subject_id,
            &config.session_id,
            sample_rate,
        )
        .context("Saving session failed")?;

    let summary = SessionSummary::from_result(&result, nominal_rate);
    summary.log();

    Ok(SessionOutcome {
        summary,
        written,
        channel_names,
        sample_rate,
    })
}

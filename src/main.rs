//! Neuroacq - biosignal stream acquisition
//!
//! Entry point for the command-line recorder. Built with the `lsl` feature it
//! binds to streams on the Lab Streaming Layer network; otherwise (or with
//! `--simulate`) it records from an in-process simulated network with an
//! 8-channel OpenBCI board plus a marker outlet.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neuroacq::clock::{Clock, MonotonicClock};
use neuroacq::stream::simulated::SimulatedNetwork;
use neuroacq::stream::{StreamInfo, StreamKind};
use neuroacq::{run_session, SessionConfig, SessionOutcome, StopSignal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Record biosignal and marker streams into tabular and FIFF files
#[derive(Parser)]
#[command(name = "neuroacq")]
#[command(version = neuroacq::VERSION)]
#[command(about = "Biosignal stream acquisition and epoch assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a session and save it
    Record {
        /// Session config file (default: <data_dir>/neuroacq/session.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Subject identifier
        #[arg(long)]
        subject: Option<String>,

        /// Session identifier
        #[arg(long)]
        session: Option<String>,

        /// Acquisition duration in seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Samples per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Output root directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record without a marker stream
        #[arg(long)]
        no_markers: bool,

        /// Record from the simulated demo outlets
        #[arg(long)]
        simulate: bool,
    },

    /// List the streams visible on the network
    List {
        /// Seconds to wait for stream announcements
        #[arg(short, long, default_value_t = 2.0)]
        wait: f64,

        /// List the simulated demo outlets
        #[arg(long)]
        simulate: bool,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "neuroacq=info"
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
            ),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Record {
            config,
            subject,
            session,
            duration,
            chunk_size,
            output,
            no_markers,
            simulate,
        } => load_config(config).and_then(|mut cfg| {
            if let Some(subject) = subject {
                cfg.subject_id = subject;
            }
            if let Some(session) = session {
                cfg.session_id = session;
            }
            if let Some(duration) = duration {
                cfg.duration_secs = duration;
            }
            if let Some(chunk_size) = chunk_size {
                cfg.chunk_size = chunk_size;
            }
            if let Some(output) = output {
                cfg.output_dir = output;
            }
            if no_markers {
                cfg.marker_stream = None;
            }
            record(&cfg, simulate)
        }),
        Commands::List { wait, simulate } => list_streams(wait, simulate),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let core = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<neuroacq::Error>());
            let stage = core.map(|c| c.stage()).unwrap_or("setup");
            if let Some(neuroacq::Error::StreamRead { drop_log, .. }) = core {
                error!(stage, ?drop_log, "Chunks dropped before the read failure");
            }
            error!(stage, error = %format!("{:#}", e), "Session failed");
            eprintln!("Error ({}): {:#}", stage, e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from(&path),
        None => Ok(SessionConfig::load()),
    }
}

fn record(config: &SessionConfig, simulate: bool) -> Result<()> {
    println!("neuroacq v{}", neuroacq::VERSION);
    println!(
        "Subject {} / session {} - {} s of '{}'{}",
        config.subject_id,
        config.session_id,
        config.duration_secs,
        config.biosignal_stream,
        config
            .marker_stream
            .as_ref()
            .map(|m| format!(" with markers from '{}'", m))
            .unwrap_or_default()
    );

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.trigger())
        .context("Failed to install Ctrl+C handler")?;

    let clock = MonotonicClock::new();
    let outcome = acquire(config, simulate, &clock, stop)?;

    let s = &outcome.summary;
    println!();
    println!("Session summary");
    println!("────────────────────────────────────────");
    println!(
        "Chunks:    {} complete, {} dropped ({:.2}%)",
        s.complete_chunks,
        s.dropped_chunks,
        s.drop_ratio * 100.0
    );
    println!(
        "Samples:   {} x {} channels",
        s.total_samples, s.channel_count
    );
    println!(
        "Rate:      {:.1} Hz effective / {:.1} Hz nominal",
        s.effective_rate_hz, s.nominal_rate_hz
    );
    println!("Markers:   {}", s.marker_count);
    println!(
        "Elapsed:   {:.2} s{}",
        s.elapsed_seconds,
        if s.interrupted { " (interrupted)" } else { "" }
    );
    println!();
    for path in &outcome.written {
        println!("  {}", path.display());
    }

    info!(files = outcome.written.len(), "Done");
    Ok(())
}

#[cfg(feature = "lsl")]
fn acquire(
    config: &SessionConfig,
    simulate: bool,
    clock: &dyn Clock,
    stop: StopSignal,
) -> Result<SessionOutcome> {
    if simulate {
        return acquire_simulated(config, clock, stop);
    }
    println!("Resolving streams on the LSL network. Press Ctrl+C to stop early.");
    run_session(config, neuroacq::stream::lsl_network::LslNetwork::new(), clock, stop)
}

#[cfg(not(feature = "lsl"))]
fn acquire(
    config: &SessionConfig,
    _simulate: bool,
    clock: &dyn Clock,
    stop: StopSignal,
) -> Result<SessionOutcome> {
    acquire_simulated(config, clock, stop)
}

fn acquire_simulated(
    config: &SessionConfig,
    clock: &dyn Clock,
    stop: StopSignal,
) -> Result<SessionOutcome> {
    let (network, _outlets) = SimulatedNetwork::openbci_demo(config.marker_stream.is_some())
        .context("Failed to start simulated outlets")?;
    println!("Recording from simulated outlets. Press Ctrl+C to stop early.");
    run_session(config, &network, clock, stop)
}

#[cfg(feature = "lsl")]
fn discover_all(wait: Duration, simulate: bool) -> Result<Vec<StreamInfo>> {
    if simulate {
        return simulated_streams();
    }
    neuroacq::stream::lsl_network::LslNetwork::new()
        .streams(wait)
        .context("LSL stream listing failed")
}

#[cfg(not(feature = "lsl"))]
fn discover_all(_wait: Duration, _simulate: bool) -> Result<Vec<StreamInfo>> {
    simulated_streams()
}

fn simulated_streams() -> Result<Vec<StreamInfo>> {
    let (network, _outlets) =
        SimulatedNetwork::openbci_demo(true).context("Failed to start simulated outlets")?;
    Ok(network.streams())
}

fn list_streams(wait: f64, simulate: bool) -> Result<()> {
    if !(wait.is_finite() && wait >= 0.0) {
        anyhow::bail!("--wait must be a non-negative number of seconds");
    }
    let streams = discover_all(Duration::from_secs_f64(wait), simulate)?;
    if streams.is_empty() {
        println!("No streams found.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:>8} {:>10}",
        "NAME", "KIND", "CHANNELS", "RATE (Hz)"
    );
    for info in streams {
        let kind = info.kind();
        let rate = match kind {
            StreamKind::Marker => "irregular".to_string(),
            StreamKind::Biosignal => format!("{:.1}", info.nominal_rate_hz),
        };
        println!(
            "{:<16} {:<10} {:>8} {:>10}",
            info.name, kind, info.channel_count, rate
        );
    }
    Ok(())
}

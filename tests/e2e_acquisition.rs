//! E2E tests for a full session against the scripted backend
//!
//! Drives run_session with a manual clock so every poll costs exactly
//! 100 ms and the duration bound is deterministic.

use neuroacq::clock::ManualClock;
use neuroacq::stream::scripted::{ScriptedNetwork, ScriptedStream};
use neuroacq::{run_session, Error, SessionConfig, StopSignal};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

const POLL_COST: Duration = Duration::from_millis(100);

fn session_config(output: &Path, duration_secs: f64) -> SessionConfig {
    SessionConfig {
        subject_id: "P01".to_string(),
        session_id: "3".to_string(),
        biosignal_stream: "EEG".to_string(),
        marker_stream: Some("Markers".to_string()),
        duration_secs,
        chunk_size: 25,
        resolve_timeout_secs: 0.1,
        output_dir: output.to_path_buf(),
        ..SessionConfig::default()
    }
}

fn core_error(err: &anyhow::Error) -> &Error {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .expect("error chain should carry a core error")
}

#[test]
fn test_short_chunk_is_dropped_and_logged() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(
            ScriptedStream::biosignal("EEG", 8, 250.0)
                .with_full_chunks(10, 25)
                .with_chunk(20)
                .with_full_chunks(1, 25),
        )
        .with_stream(ScriptedStream::markers("Markers"))
        .with_clock(clock.clone(), POLL_COST);

    let config = session_config(dir.path(), 1.2);
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();

    let s = &outcome.summary;
    assert_eq!(s.complete_chunks, 11);
    assert_eq!(s.dropped_chunks, 1);
    assert_eq!(s.drop_log, vec![11]);
    assert_eq!(s.total_samples, 275);
    assert_eq!(s.channel_count, 8);
    assert!(!s.interrupted);
    assert!(!s.is_clean());
    assert_eq!(net.poll_counter().load(Ordering::SeqCst), 12);
}

#[test]
fn test_marker_lands_on_polling_iteration() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 4, 250.0).with_full_chunks(8, 25))
        .with_stream(ScriptedStream::markers("Markers").with_marker_at(5, 7))
        .with_clock(clock.clone(), POLL_COST);

    let config = session_config(dir.path(), 0.8);
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();
    assert_eq!(outcome.summary.marker_count, 1);

    let eve = outcome
        .written
        .iter()
        .find(|p| p.to_string_lossy().ends_with("_eve.csv"))
        .unwrap();
    let content = std::fs::read_to_string(eve).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "sample,chunk,code,timestamp");
    // Onset is chunk_index * chunk_size
    assert!(lines[1].starts_with("125,5,7,"), "{}", lines[1]);
}

#[test]
fn test_session_writes_all_artifacts_in_order() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 2, 250.0).with_full_chunks(4, 25))
        .with_stream(ScriptedStream::markers("Markers"))
        .with_clock(clock.clone(), POLL_COST);

    let config = session_config(dir.path(), 0.4);
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();

    let suffixes: Vec<String> = outcome
        .written
        .iter()
        .map(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            name.rsplit_once(['_', '-'])
                .map(|(_, tail)| tail.to_string())
                .unwrap_or(name)
        })
        .collect();
    assert_eq!(
        suffixes,
        vec!["raw.csv", "eve.csv", "raw.fif", "eve.fif", "epo.fif", "summary.json"]
    );
    for path in &outcome.written {
        assert!(path.starts_with(dir.path().join("P01")), "{}", path.display());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("P01_session3_"), "{}", name);
        assert!(path.exists());
    }

    // Scripted streams carry no labels, so outputs fall back to Ch1..ChN
    assert_eq!(outcome.channel_names, vec!["Ch1", "Ch2"]);
    assert_eq!(outcome.sample_rate, 250.0);
}

#[test]
fn test_raw_table_matches_chunk_order() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(
            ScriptedStream::biosignal("EEG", 3, 250.0)
                .with_full_chunks(1, 25)
                .with_chunk(10)
                .with_full_chunks(1, 25),
        )
        .with_clock(clock.clone(), POLL_COST);

    let config = SessionConfig {
        marker_stream: None,
        ..session_config(dir.path(), 0.3)
    };
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();

    let raw = outcome
        .written
        .iter()
        .find(|p| p.to_string_lossy().ends_with("_raw.csv"))
        .unwrap();
    let content = std::fs::read_to_string(raw).unwrap();
    let rows: Vec<&str> = content.lines().collect();
    assert_eq!(rows.len(), 50);

    let expected_first = (0..3)
        .map(|ch| ScriptedStream::sample_value(0, 0, ch).to_string())
        .collect::<Vec<_>>()
        .join(",");
    assert_eq!(rows[0], expected_first);

    // Row 25 is the first sample of the third scripted chunk
    let expected_after_gap = (0..3)
        .map(|ch| ScriptedStream::sample_value(2, 0, ch).to_string())
        .collect::<Vec<_>>()
        .join(",");
    assert_eq!(rows[25], expected_after_gap);
}

#[test]
fn test_zero_duration_fails_at_assembly() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 8, 250.0).with_full_chunks(3, 25))
        .with_stream(ScriptedStream::markers("Markers"))
        .with_clock(clock.clone(), POLL_COST);

    let config = session_config(dir.path(), 0.0);
    let err = run_session(&config, &net, &clock, StopSignal::new()).unwrap_err();

    assert!(matches!(core_error(&err), Error::EmptyAcquisition));
    assert_eq!(core_error(&err).stage(), "assembly");
    assert_eq!(net.poll_counter().load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("P01").exists());
}

#[test]
fn test_read_failure_carries_drop_log() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(
            ScriptedStream::biosignal("EEG", 8, 250.0)
                .with_full_chunks(1, 25)
                .with_chunk(5)
                .with_failure("connection reset"),
        )
        .with_stream(ScriptedStream::markers("Markers"))
        .with_clock(clock.clone(), POLL_COST);
    let closes = net.close_counter();

    let config = session_config(dir.path(), 5.0);
    let err = run_session(&config, &net, &clock, StopSignal::new()).unwrap_err();

    match core_error(&err) {
        Error::StreamRead {
            sequence, drop_log, ..
        } => {
            assert_eq!(*sequence, 3);
            assert_eq!(drop_log, &vec![2]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Biosignal and marker subscriptions, each closed once
    assert_eq!(closes.load(Ordering::SeqCst), 2);
    assert!(!dir.path().join("P01").exists());
}

#[test]
fn test_stop_before_first_poll_collects_nothing() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 8, 250.0).with_full_chunks(3, 25))
        .with_clock(clock.clone(), POLL_COST);

    let stop = StopSignal::new();
    stop.trigger();

    let config = SessionConfig {
        marker_stream: None,
        ..session_config(dir.path(), 5.0)
    };
    // Stop before the first poll leaves nothing to assemble
    let err = run_session(&config, &net, &clock, stop).unwrap_err();
    assert!(matches!(core_error(&err), Error::EmptyAcquisition));
    assert_eq!(net.poll_counter().load(Ordering::SeqCst), 0);
}

#[test]
fn test_invalid_config_stops_before_discovery() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 8, 250.0).with_full_chunks(3, 25));

    let config = SessionConfig {
        chunk_size: 0,
        ..session_config(dir.path(), 1.0)
    };
    assert!(run_session(&config, &net, &clock, StopSignal::new()).is_err());
    assert_eq!(net.poll_counter().load(Ordering::SeqCst), 0);
}

#[test]
fn test_dejittered_session_keeps_samples() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 2, 250.0).with_full_chunks(4, 25))
        .with_clock(clock.clone(), POLL_COST);

    let config = SessionConfig {
        marker_stream: None,
        dejitter: true,
        ..session_config(dir.path(), 0.4)
    };
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();
    assert_eq!(outcome.summary.total_samples, 100);
    assert!(outcome.summary.is_clean());
}

#[test]
fn test_summary_reports_stream_rate_under_rate_override() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 2, 250.0).with_full_chunks(4, 25))
        .with_clock(clock.clone(), POLL_COST);

    let config = SessionConfig {
        marker_stream: None,
        sample_rate: Some(500.0),
        ..session_config(dir.path(), 0.4)
    };
    let outcome = run_session(&config, &net, &clock, StopSignal::new()).unwrap();
    assert_eq!(outcome.sample_rate, 500.0);

    let summary_path = outcome
        .written
        .iter()
        .find(|p| p.to_string_lossy().ends_with("_summary.json"))
        .unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(json["nominal_rate_hz"], 250.0);
    assert_eq!(outcome.summary.nominal_rate_hz, 250.0);
}

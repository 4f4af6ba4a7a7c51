//! E2E test for a short real-time session against the simulated board
//!
//! Timing-dependent, so assertions only check what any scheduler delivers.

use neuroacq::clock::MonotonicClock;
use neuroacq::stream::simulated::SimulatedNetwork;
use neuroacq::{run_session, SessionConfig, StopSignal};
use tempfile::TempDir;

#[test]
fn test_demo_board_session_saves_outputs() {
    let dir = TempDir::new().unwrap();
    let (network, outlets) = SimulatedNetwork::openbci_demo(true).unwrap();

    let config = SessionConfig {
        subject_id: "demo".to_string(),
        duration_secs: 0.6,
        resolve_timeout_secs: 1.0,
        output_dir: dir.path().to_path_buf(),
        ..SessionConfig::default()
    };
    let outcome =
        run_session(&config, &network, &MonotonicClock::new(), StopSignal::new()).unwrap();

    assert_eq!(outcome.channel_names.len(), 8);
    assert_eq!(outcome.sample_rate, 250.0);
    assert!(outcome.summary.complete_chunks >= 1);
    assert_eq!(
        outcome.summary.total_samples,
        outcome.summary.complete_chunks * config.chunk_size
    );
    assert_eq!(outcome.written.len(), 6);
    assert!(outcome.written.iter().all(|p| p.exists()));

    drop(outlets);
    assert!(network.streams().is_empty());
}

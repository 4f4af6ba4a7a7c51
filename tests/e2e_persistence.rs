//! E2E tests for saving an assembled acquisition
//!
//! Acquires from the scripted backend through the core API, then checks the
//! tabular and FIFF outputs by reading them back.

use chrono::{Local, TimeZone};
use neuroacq::clock::ManualClock;
use neuroacq::persist::fif::{self, tag};
use neuroacq::stream::scripted::{ScriptedNetwork, ScriptedStream};
use neuroacq::{
    AcquisitionConfig, AcquisitionLoop, AcquisitionResult, Error, Persister, SessionSummary,
    StopSignal, StreamRegistry,
};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const POLL_COST: Duration = Duration::from_millis(100);

/// 8 polls of 25 samples from a 4-channel 100 Hz stream, one marker on poll 4
fn acquire() -> AcquisitionResult {
    let clock = ManualClock::new();
    let net = ScriptedNetwork::new()
        .with_stream(ScriptedStream::biosignal("EEG", 4, 100.0).with_full_chunks(8, 25))
        .with_stream(ScriptedStream::markers("Markers").with_marker_at(4, 3))
        .with_clock(clock.clone(), POLL_COST);

    let registry = StreamRegistry::new(&net, 25);
    let mut streams = registry
        .discover(["EEG", "Markers"], Duration::from_millis(50))
        .unwrap();
    let (biosignal, marker) = streams.split_mut();

    let config = AcquisitionConfig {
        duration: POLL_COST * 8,
        chunk_size: 25,
        ..AcquisitionConfig::default()
    };
    let record = AcquisitionLoop::new(config, &clock, StopSignal::new())
        .run(biosignal, marker)
        .unwrap();
    record.assemble().unwrap()
}

fn names() -> Vec<String> {
    ["Fz", "Cz", "Pz", "Oz"].iter().map(|s| s.to_string()).collect()
}

fn save(dir: &TempDir, result: &AcquisitionResult) -> Vec<PathBuf> {
    let date = Local.with_ymd_and_hms(2020, 1, 13, 14, 5, 0).unwrap();
    Persister::new(dir.path())
        .save_at(result, &names(), "P02", "1", 100.0, date)
        .unwrap()
}

#[test]
fn test_file_names_follow_subject_session_date() {
    let dir = TempDir::new().unwrap();
    let written = save(&dir, &acquire());

    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "P02_session1_2020_Jan_13_1405_raw.csv",
            "P02_session1_2020_Jan_13_1405_eve.csv",
            "P02_session1_2020_Jan_13_1405_raw.fif",
            "P02_session1_2020_Jan_13_1405-eve.fif",
            "P02_session1_2020_Jan_13_1405-epo.fif",
            "P02_session1_2020_Jan_13_1405_summary.json",
        ]
    );
    assert!(written.iter().all(|p| p.parent() == Some(dir.path().join("P02").as_path())));
}

#[test]
fn test_raw_container_metadata_and_samples() {
    let dir = TempDir::new().unwrap();
    let result = acquire();
    let written = save(&dir, &result);

    let tags = fif::read_tags(&written[2]).unwrap();
    let nchan = tags.iter().find(|t| t.kind == tag::NCHAN).unwrap();
    assert_eq!(nchan.as_i32s(), vec![4]);
    let sfreq = tags.iter().find(|t| t.kind == tag::SFREQ).unwrap();
    assert_eq!(sfreq.as_f32s(), vec![100.0]);

    let channels: Vec<String> = tags.iter().filter_map(|t| t.ch_name()).collect();
    assert_eq!(channels, names());

    // One-second buffers at 100 Hz
    let buffers: Vec<_> = tags.iter().filter(|t| t.kind == tag::DATA_BUFFER).collect();
    assert_eq!(buffers.len(), 2);
    assert_eq!(buffers[0].matrix_dims(), Some(vec![100, 4]));

    let first = buffers[0].matrix_f32s().unwrap();
    for ch in 0..4 {
        assert_eq!(first[ch], result.raw_matrix()[[ch, 0]]);
    }
}

#[test]
fn test_event_outputs_agree() {
    let dir = TempDir::new().unwrap();
    let result = acquire();
    assert_eq!(result.events().len(), 1);
    let written = save(&dir, &result);

    let csv = std::fs::read_to_string(&written[1]).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].starts_with("100,4,3,"), "{}", rows[1]);

    let tags = fif::read_tags(&written[3]).unwrap();
    let list = tags.iter().find(|t| t.kind == tag::MNE_EVENT_LIST).unwrap();
    assert_eq!(list.as_i32s(), vec![100, 0, 3]);
}

#[test]
fn test_epoch_container_holds_one_epoch() {
    let dir = TempDir::new().unwrap();
    let written = save(&dir, &acquire());

    let tags = fif::read_tags(&written[4]).unwrap();
    let epoch = tags.iter().find(|t| t.kind == tag::EPOCH).unwrap();
    let dims = epoch.matrix_dims().unwrap();
    assert_eq!(dims[0], 1);
    assert_eq!(dims[1], 4);

    let first = tags.iter().find(|t| t.kind == tag::FIRST_SAMPLE).unwrap();
    assert_eq!(first.as_i32s(), vec![-20]);
}

#[test]
fn test_summary_json_round_trips() {
    let dir = TempDir::new().unwrap();
    let result = acquire();
    let written = save(&dir, &result);

    let json = std::fs::read_to_string(&written[5]).unwrap();
    let summary: SessionSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(summary.complete_chunks, 8);
    assert_eq!(summary.total_samples, 200);
    assert_eq!(summary.marker_count, 1);
    assert!(summary.is_clean());
}

#[test]
fn test_channel_name_count_must_match() {
    let dir = TempDir::new().unwrap();
    let result = acquire();
    let err = Persister::new(dir.path())
        .save(&result, &names()[..2], "P02", "1", 100.0)
        .unwrap_err();
    assert!(matches!(err, Error::ChannelMismatch { expected: 4, actual: 2 }));
}

#[test]
fn test_unwritable_output_names_failing_artifact() {
    let dir = TempDir::new().unwrap();
    // A file where the subject directory should go
    std::fs::write(dir.path().join("P02"), b"blocker").unwrap();

    let err = Persister::new(dir.path())
        .save(&acquire(), &names(), "P02", "1", 100.0)
        .unwrap_err();
    match err {
        Error::Persistence {
            artifact, written, ..
        } => {
            assert_eq!(artifact, "output directory");
            assert!(written.is_empty());
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

//! Comma-delimited outputs
//!
//! - `_raw.csv`: one row per sample, one column per channel, no header
//! - `_eve.csv`: one row per event with a `sample,chunk,code,timestamp` header

use crate::assembler::{AlignedEvent, SampleMatrix};
use serde::Serialize;
use std::io;
use std::path::Path;

#[derive(Debug, Serialize)]
struct EventRecord {
    sample: usize,
    chunk: u64,
    code: i32,
    timestamp: f64,
}

impl From<&AlignedEvent> for EventRecord {
    fn from(event: &AlignedEvent) -> Self {
        Self {
            sample: event.sample_index,
            chunk: event.chunk_index,
            code: event.code,
            timestamp: event.timestamp,
        }
    }
}

/// Write the matrix as samples × channels
pub fn write_raw_csv(path: &Path, matrix: &SampleMatrix) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let mut row: Vec<String> = Vec::with_capacity(matrix.nrows());
    for sample in matrix.columns() {
        row.clear();
        row.extend(sample.iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), rows = matrix.ncols(), "Raw CSV written");
    Ok(())
}

/// Write the event list with a header row
pub fn write_events_csv(path: &Path, events: &[AlignedEvent]) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    if events.is_empty() {
        writer.write_record(["sample", "chunk", "code", "timestamp"])?;
    }
    for event in events {
        writer.serialize(EventRecord::from(event))?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), rows = events.len(), "Event CSV written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_raw_csv_is_sample_major() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s_raw.csv");
        let matrix = SampleMatrix::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.5, 5.0, 6.0]).unwrap();

        write_raw_csv(&path, &matrix).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["1,4.5", "2,5", "3,6"]);
    }

    #[test]
    fn test_events_csv_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s_eve.csv");
        let events = [AlignedEvent {
            chunk_index: 5,
            code: 7,
            timestamp: 1.25,
            sample_index: 125,
        }];

        write_events_csv(&path, &events).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["sample,chunk,code,timestamp", "125,5,7,1.25"]);
    }

    #[test]
    fn test_empty_events_csv_keeps_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s_eve.csv");
        write_events_csv(&path, &[]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), "sample,chunk,code,timestamp");
    }
}

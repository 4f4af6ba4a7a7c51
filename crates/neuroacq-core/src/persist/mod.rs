//! Persistence of an assembled acquisition
//!
//! Writes, in order, under `<output_dir>/<subject_id>/`:
//! 1. `<base>_raw.csv` and `<base>_eve.csv` (plain tabular)
//! 2. `<base>_raw.fif`, `<base>-eve.fif`, `<base>-epo.fif` (FIFF container)
//! 3. `<base>_summary.json` (session statistics)
//!
//! `<base>` is `{subject}_session{session}_{date}`. A failure stops the
//! sequence; files already written stay on disk and are listed in the error.

pub mod fif;
pub mod tabular;

use crate::assembler::AcquisitionResult;
use crate::epochs::{extract_epochs, EpochWindow};
use crate::error::{Error, Result};
use crate::stats::SessionSummary;
use chrono::{DateTime, Local, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Date stamp used in output names, e.g. `2020_Jan_13_1405`
pub const DATE_FORMAT: &str = "%Y_%b_%d_%H%M";

/// Writes acquisition results to disk
#[derive(Debug, Clone)]
pub struct Persister {
    output_dir: PathBuf,
    epoch_window: EpochWindow,
    nominal_rate_hz: Option<f64>,
}

impl Persister {
    /// # Arguments
    /// * `output_dir` - Root directory; each subject gets a subdirectory
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            epoch_window: EpochWindow::default(),
            nominal_rate_hz: None,
        }
    }

    /// Window used for the `-epo.fif` output
    pub fn with_epoch_window(mut self, window: EpochWindow) -> Self {
        self.epoch_window = window;
        self
    }

    /// Rate the stream advertised, recorded in the summary
    ///
    /// Defaults to the output sample rate passed to [`Persister::save`].
    pub fn with_nominal_rate(mut self, rate_hz: f64) -> Self {
        self.nominal_rate_hz = Some(rate_hz);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Base file name for a session recorded at `date`
    ///
    /// # Example
    /// ```
    /// use chrono::{Local, TimeZone};
    /// use neuroacq_core::Persister;
    ///
    /// let date = Local.with_ymd_and_hms(2020, 1, 13, 14, 5, 0).unwrap();
    /// assert_eq!(Persister::base_name("P01", "2", date), "P01_session2_2020_Jan_13_1405");
    /// ```
    pub fn base_name(subject_id: &str, session_id: &str, date: DateTime<Local>) -> String {
        format!(
            "{}_session{}_{}",
            subject_id,
            session_id,
            date.format(DATE_FORMAT)
        )
    }

    /// Directory holding one subject's sessions
    pub fn subject_dir(&self, subject_id: &str) -> PathBuf {
        self.output_dir.join(subject_id)
    }

    /// Write every artifact for a session, dated now
    ///
    /// # Arguments
    /// * `result` - Assembled acquisition
    /// * `channel_names` - One name per matrix row
    /// * `subject_id` / `session_id` - Identity used in the file names
    /// * `sample_rate` - Sampling rate recorded in the container metadata
    ///
    /// # Returns
    /// Written paths in write order
    ///
    /// # Errors
    /// - [`Error::ChannelMismatch`] if `channel_names` does not match the matrix
    /// - [`Error::InvalidConfig`] for a non-positive sample rate
    /// - [`Error::Persistence`] naming the failing artifact
    pub fn save(
        &self,
        result: &AcquisitionResult,
        channel_names: &[String],
        subject_id: &str,
        session_id: &str,
        sample_rate: f64,
    ) -> Result<Vec<PathBuf>> {
        self.save_at(
            result,
            channel_names,
            subject_id,
            session_id,
            sample_rate,
            Local::now(),
        )
    }

    /// [`Persister::save`] with an explicit session date
    pub fn save_at(
        &self,
        result: &AcquisitionResult,
        channel_names: &[String],
        subject_id: &str,
        session_id: &str,
        sample_rate: f64,
        date: DateTime<Local>,
    ) -> Result<Vec<PathBuf>> {
        if channel_names.len() != result.channel_count() {
            return Err(Error::ChannelMismatch {
                expected: result.channel_count(),
                actual: channel_names.len(),
            });
        }
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }

        let dir = self.subject_dir(subject_id);
        let base = Self::base_name(subject_id, session_id, date);
        let mut written: Vec<PathBuf> = Vec::new();

        fs::create_dir_all(&dir).map_err(|source| Error::Persistence {
            artifact: "output directory",
            path: dir.clone(),
            written: Vec::new(),
            source,
        })?;

        let epochs = extract_epochs(
            result.raw_matrix(),
            result.events(),
            sample_rate,
            self.epoch_window,
        )?;
        let meas_date: DateTime<Utc> = date.with_timezone(&Utc);
        let info = fif::MeasInfo::new(
            channel_names,
            sample_rate,
            meas_date,
            format!("subject {} session {}", subject_id, session_id),
        );
        let summary =
            SessionSummary::from_result(result, self.nominal_rate_hz.unwrap_or(sample_rate));

        let mut step = |artifact: &'static str,
                        suffix: &str,
                        write: &dyn Fn(&Path) -> io::Result<()>|
         -> Result<()> {
            let path = dir.join(format!("{}{}", base, suffix));
            match write(&path) {
                Ok(()) => {
                    tracing::info!(artifact, path = %path.display(), "Artifact written");
                    written.push(path);
                    Ok(())
                }
                Err(source) => {
                    tracing::error!(
                        artifact,
                        path = %path.display(),
                        error = %source,
                        already_written = written.len(),
                        "Artifact write failed"
                    );
                    Err(Error::Persistence {
                        artifact,
                        path,
                        written: written.clone(),
                        source,
                    })
                }
            }
        };

        step("raw table", "_raw.csv", &|p| {
            tabular::write_raw_csv(p, result.raw_matrix())
        })?;
        step("event table", "_eve.csv", &|p| {
            tabular::write_events_csv(p, result.events())
        })?;
        step("raw container", "_raw.fif", &|p| {
            fif::write_raw(p, result.raw_matrix(), &info)
        })?;
        step("event container", "-eve.fif", &|p| {
            fif::write_events(p, result.events(), meas_date)
        })?;
        step("epoch container", "-epo.fif", &|p| {
            fif::write_epochs(p, &epochs, &info)
        })?;
        step("summary", "_summary.json", &|p| write_summary(p, &summary))?;

        tracing::info!(
            dir = %dir.display(),
            base = %base,
            files = written.len(),
            "Session saved"
        );
        Ok(written)
    }
}

fn write_summary(path: &Path, summary: &SessionSummary) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()
}

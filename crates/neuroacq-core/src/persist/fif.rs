//! FIFF container writer
//!
//! FIFF is a flat stream of big-endian tags. Each tag has a 16-byte header
//! followed by its payload:
//!
//! ```text
//! [i32 kind][i32 type][i32 size][i32 next][payload: size bytes]
//! ```
//!
//! Blocks are bracketed by `BLOCK_START` / `BLOCK_END` tags carrying the
//! block kind. `next` is always 0 (tags are sequential).
//!
//! Three files are produced per session:
//! - `_raw.fif`: measurement info and the continuous sample buffers
//! - `-eve.fif`: the event list as `(sample, previous, code)` triplets
//! - `-epo.fif`: measurement info, event list and the 3-D epoch array
//!
//! Sample values are stored in µV with a per-channel calibration of 1e-6, so
//! readers that apply calibration see volts.

use crate::assembler::{AlignedEvent, SampleMatrix};
use crate::epochs::Epochs;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Block kinds
pub mod block {
    pub const MEAS: i32 = 100;
    pub const MEAS_INFO: i32 = 101;
    pub const RAW_DATA: i32 = 102;
    pub const MNE_EVENTS: i32 = 115;
    pub const MNE_EPOCHS: i32 = 373;
}

/// Tag kinds
pub mod tag {
    pub const FILE_ID: i32 = 100;
    pub const DIR_POINTER: i32 = 101;
    pub const BLOCK_START: i32 = 104;
    pub const BLOCK_END: i32 = 105;
    pub const NCHAN: i32 = 200;
    pub const SFREQ: i32 = 201;
    pub const CH_INFO: i32 = 203;
    pub const MEAS_DATE: i32 = 204;
    pub const DESCRIPTION: i32 = 206;
    pub const FIRST_SAMPLE: i32 = 208;
    pub const LAST_SAMPLE: i32 = 209;
    pub const DATA_BUFFER: i32 = 300;
    pub const EPOCH: i32 = 302;
    pub const MNE_EVENT_LIST: i32 = 3601;
}

/// Payload data types
pub mod data_type {
    pub const INT: i32 = 3;
    pub const FLOAT: i32 = 4;
    pub const DOUBLE: i32 = 5;
    pub const STRING: i32 = 10;
    pub const CH_INFO_STRUCT: i32 = 30;
    pub const ID_STRUCT: i32 = 31;
    /// Bit flag combined with an element type for dense matrices
    pub const MATRIX: i32 = 0x4000_0000;
}

const FILE_VERSION: i32 = (1 << 16) | 3;
const UNIT_VOLT: i32 = 107;
const UNIT_NONE: i32 = -1;
const COIL_NONE: i32 = 0;
const COIL_EEG: i32 = 1;
const CH_NAME_LEN: usize = 16;
const CH_INFO_SIZE: i32 = 96;
const MICROVOLT_CAL: f32 = 1e-6;

/// Physiological type of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Eeg,
    Eog,
    Ecg,
    Emg,
    Stim,
    Misc,
}

impl ChannelType {
    /// Infer the type from a channel name prefix
    ///
    /// # Example
    /// ```
    /// use neuroacq_core::persist::fif::ChannelType;
    ///
    /// assert_eq!(ChannelType::from_name("EOG left"), ChannelType::Eog);
    /// assert_eq!(ChannelType::from_name("STI 014"), ChannelType::Stim);
    /// assert_eq!(ChannelType::from_name("Fp1"), ChannelType::Eeg);
    /// ```
    pub fn from_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        if upper.starts_with("EOG") {
            ChannelType::Eog
        } else if upper.starts_with("ECG") || upper.starts_with("EKG") {
            ChannelType::Ecg
        } else if upper.starts_with("EMG") {
            ChannelType::Emg
        } else if upper.starts_with("STI") || upper.starts_with("TRIG") {
            ChannelType::Stim
        } else if upper.starts_with("MISC") {
            ChannelType::Misc
        } else {
            ChannelType::Eeg
        }
    }

    /// FIFF channel kind code
    pub fn fiff_kind(self) -> i32 {
        match self {
            ChannelType::Eeg => 2,
            ChannelType::Stim => 3,
            ChannelType::Eog => 202,
            ChannelType::Emg => 302,
            ChannelType::Ecg => 402,
            ChannelType::Misc => 502,
        }
    }

    fn unit(self) -> i32 {
        match self {
            ChannelType::Stim => UNIT_NONE,
            _ => UNIT_VOLT,
        }
    }

    fn cal(self) -> f32 {
        match self {
            ChannelType::Stim => 1.0,
            _ => MICROVOLT_CAL,
        }
    }

    fn coil(self) -> i32 {
        match self {
            ChannelType::Eeg => COIL_EEG,
            _ => COIL_NONE,
        }
    }
}

/// Measurement metadata shared by all FIFF outputs
#[derive(Debug, Clone)]
pub struct MeasInfo {
    pub channels: Vec<(String, ChannelType)>,
    pub sample_rate: f64,
    pub meas_date: DateTime<Utc>,
    pub description: String,
}

impl MeasInfo {
    /// Build measurement info with channel types inferred from names
    pub fn new(
        channel_names: &[String],
        sample_rate: f64,
        meas_date: DateTime<Utc>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            channels: channel_names
                .iter()
                .map(|n| (n.clone(), ChannelType::from_name(n)))
                .collect(),
            sample_rate,
            meas_date,
            description: description.into(),
        }
    }

    pub fn nchan(&self) -> usize {
        self.channels.len()
    }
}

/// Tag-level writer
struct TagWriter<W: Write> {
    inner: W,
}

impl<W: Write> TagWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }

    fn header(&mut self, kind: i32, ty: i32, size: usize) -> io::Result<()> {
        let size = i32::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "FIFF tag too large"))?;
        self.inner.write_i32::<BigEndian>(kind)?;
        self.inner.write_i32::<BigEndian>(ty)?;
        self.inner.write_i32::<BigEndian>(size)?;
        self.inner.write_i32::<BigEndian>(0)
    }

    fn file_id(&mut self, date: DateTime<Utc>) -> io::Result<()> {
        self.header(tag::FILE_ID, data_type::ID_STRUCT, 20)?;
        self.inner.write_i32::<BigEndian>(FILE_VERSION)?;
        self.inner.write_i32::<BigEndian>(0)?;
        self.inner.write_i32::<BigEndian>(0)?;
        self.inner.write_i32::<BigEndian>(date.timestamp() as i32)?;
        self.inner
            .write_i32::<BigEndian>(date.timestamp_subsec_micros() as i32)?;
        // No directory
        self.int(tag::DIR_POINTER, -1)
    }

    fn start_block(&mut self, kind: i32) -> io::Result<()> {
        self.int(tag::BLOCK_START, kind)
    }

    fn end_block(&mut self, kind: i32) -> io::Result<()> {
        self.int(tag::BLOCK_END, kind)
    }

    fn int(&mut self, kind: i32, value: i32) -> io::Result<()> {
        self.ints(kind, &[value])
    }

    fn ints(&mut self, kind: i32, values: &[i32]) -> io::Result<()> {
        self.header(kind, data_type::INT, values.len() * 4)?;
        for &v in values {
            self.inner.write_i32::<BigEndian>(v)?;
        }
        Ok(())
    }

    fn float(&mut self, kind: i32, value: f32) -> io::Result<()> {
        self.header(kind, data_type::FLOAT, 4)?;
        self.inner.write_f32::<BigEndian>(value)
    }

    fn string(&mut self, kind: i32, value: &str) -> io::Result<()> {
        self.header(kind, data_type::STRING, value.len())?;
        self.inner.write_all(value.as_bytes())
    }

    fn ch_info(&mut self, index: usize, name: &str, ch_type: ChannelType) -> io::Result<()> {
        self.header(tag::CH_INFO, data_type::CH_INFO_STRUCT, CH_INFO_SIZE as usize)?;
        let w = &mut self.inner;
        w.write_i32::<BigEndian>(index as i32 + 1)?; // scanNo
        w.write_i32::<BigEndian>(index as i32 + 1)?; // logNo
        w.write_i32::<BigEndian>(ch_type.fiff_kind())?;
        w.write_f32::<BigEndian>(1.0)?; // range
        w.write_f32::<BigEndian>(ch_type.cal())?;
        w.write_i32::<BigEndian>(ch_type.coil())?;
        for _ in 0..12 {
            w.write_f32::<BigEndian>(0.0)?;
        }
        w.write_i32::<BigEndian>(ch_type.unit())?;
        w.write_i32::<BigEndian>(0)?; // unit_mul
        let mut padded = [0u8; CH_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(CH_NAME_LEN - 1);
        padded[..n].copy_from_slice(&bytes[..n]);
        w.write_all(&padded)
    }

    /// Dense float matrix: row-major values, then dims in reverse, then ndim
    fn float_matrix(&mut self, kind: i32, values: &[f32], dims: &[usize]) -> io::Result<()> {
        let size = values.len() * 4 + dims.len() * 4 + 4;
        self.header(kind, data_type::MATRIX | data_type::FLOAT, size)?;
        for &v in values {
            self.inner.write_f32::<BigEndian>(v)?;
        }
        for &d in dims.iter().rev() {
            self.inner.write_i32::<BigEndian>(d as i32)?;
        }
        self.inner.write_i32::<BigEndian>(dims.len() as i32)
    }

    fn meas_info(&mut self, info: &MeasInfo) -> io::Result<()> {
        self.start_block(block::MEAS_INFO)?;
        self.int(tag::NCHAN, info.nchan() as i32)?;
        self.float(tag::SFREQ, info.sample_rate as f32)?;
        self.ints(
            tag::MEAS_DATE,
            &[
                info.meas_date.timestamp() as i32,
                info.meas_date.timestamp_subsec_micros() as i32,
            ],
        )?;
        if !info.description.is_empty() {
            self.string(tag::DESCRIPTION, &info.description)?;
        }
        for (i, (name, ch_type)) in info.channels.iter().enumerate() {
            self.ch_info(i, name, *ch_type)?;
        }
        self.end_block(block::MEAS_INFO)
    }

    fn event_block(&mut self, events: &[AlignedEvent]) -> io::Result<()> {
        self.start_block(block::MNE_EVENTS)?;
        self.ints(tag::MNE_EVENT_LIST, &event_triplets(events))?;
        self.end_block(block::MNE_EVENTS)
    }

    fn finish(mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `(sample, previous code, code)` triplets, flattened row-major
fn event_triplets(events: &[AlignedEvent]) -> Vec<i32> {
    events
        .iter()
        .flat_map(|e| [e.sample_index as i32, 0, e.code])
        .collect()
}

fn create(path: &Path) -> io::Result<TagWriter<BufWriter<File>>> {
    Ok(TagWriter::new(BufWriter::new(File::create(path)?)))
}

fn check_channels(info: &MeasInfo, nchan: usize) -> io::Result<()> {
    if info.nchan() != nchan {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "measurement info has {} channels, data has {}",
                info.nchan(),
                nchan
            ),
        ));
    }
    Ok(())
}

/// Write the continuous recording
///
/// Samples are split into one-second data buffers.
pub fn write_raw(path: &Path, matrix: &SampleMatrix, info: &MeasInfo) -> io::Result<()> {
    let (nchan, nsamp) = matrix.dim();
    check_channels(info, nchan)?;

    let mut w = create(path)?;
    w.file_id(info.meas_date)?;
    w.start_block(block::MEAS)?;
    w.meas_info(info)?;

    w.start_block(block::RAW_DATA)?;
    w.int(tag::FIRST_SAMPLE, 0)?;
    let buffer_len = (info.sample_rate.round() as usize).max(1);
    let mut start = 0;
    while start < nsamp {
        let end = (start + buffer_len).min(nsamp);
        // Buffers are sample-major
        let values: Vec<f32> = (start..end)
            .flat_map(|s| (0..nchan).map(move |ch| (s, ch)))
            .map(|(s, ch)| matrix[[ch, s]])
            .collect();
        w.float_matrix(tag::DATA_BUFFER, &values, &[end - start, nchan])?;
        start = end;
    }
    w.end_block(block::RAW_DATA)?;

    w.end_block(block::MEAS)?;
    w.finish()?;

    tracing::debug!(path = %path.display(), channels = nchan, samples = nsamp, "Raw FIFF written");
    Ok(())
}

/// Write the event list
pub fn write_events(
    path: &Path,
    events: &[AlignedEvent],
    meas_date: DateTime<Utc>,
) -> io::Result<()> {
    let mut w = create(path)?;
    w.file_id(meas_date)?;
    w.event_block(events)?;
    w.finish()?;

    tracing::debug!(path = %path.display(), events = events.len(), "Event FIFF written");
    Ok(())
}

/// Write the epochs with their measurement info and events
pub fn write_epochs(path: &Path, epochs: &Epochs, info: &MeasInfo) -> io::Result<()> {
    let (n_epochs, nchan, n_times) = epochs.data().dim();
    check_channels(info, nchan)?;
    let (first, last) = epochs.window().sample_offsets(epochs.sample_rate());

    let mut w = create(path)?;
    w.file_id(info.meas_date)?;
    w.start_block(block::MEAS)?;
    w.meas_info(info)?;
    w.event_block(epochs.events())?;

    w.start_block(block::MNE_EPOCHS)?;
    w.int(tag::FIRST_SAMPLE, first as i32)?;
    w.int(tag::LAST_SAMPLE, last as i32)?;
    let values: Vec<f32> = epochs.data().iter().copied().collect();
    w.float_matrix(tag::EPOCH, &values, &[n_epochs, nchan, n_times])?;
    w.end_block(block::MNE_EPOCHS)?;

    w.end_block(block::MEAS)?;
    w.finish()?;

    tracing::debug!(path = %path.display(), epochs = n_epochs, "Epoch FIFF written");
    Ok(())
}

/// A tag read back from a FIFF file
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub kind: i32,
    pub data_type: i32,
    pub data: Vec<u8>,
}

impl Tag {
    /// Payload as big-endian i32 values
    pub fn as_i32s(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Payload as big-endian f32 values
    pub fn as_f32s(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    /// Dimensions of a matrix tag, outermost first
    pub fn matrix_dims(&self) -> Option<Vec<usize>> {
        if self.data_type & data_type::MATRIX == 0 {
            return None;
        }
        let ints = self.as_i32s();
        let ndim = *ints.last()? as usize;
        let dims = ints.get(ints.len().checked_sub(ndim + 1)?..ints.len() - 1)?;
        Some(dims.iter().rev().map(|&d| d as usize).collect())
    }

    /// Element values of a float matrix tag
    pub fn matrix_f32s(&self) -> Option<Vec<f32>> {
        let dims = self.matrix_dims()?;
        let count: usize = dims.iter().product();
        let mut values = self.as_f32s();
        values.truncate(count);
        Some(values)
    }

    /// Channel name of a `CH_INFO` tag
    pub fn ch_name(&self) -> Option<String> {
        if self.kind != tag::CH_INFO || self.data.len() != CH_INFO_SIZE as usize {
            return None;
        }
        let raw = &self.data[80..96];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Channel kind of a `CH_INFO` tag
    pub fn ch_kind(&self) -> Option<i32> {
        if self.kind != tag::CH_INFO {
            return None;
        }
        self.as_i32s().get(2).copied()
    }
}

/// Read every tag of a FIFF file in order
pub fn read_tags(path: &Path) -> io::Result<Vec<Tag>> {
    let mut r = BufReader::new(File::open(path)?);
    let mut tags = Vec::new();
    loop {
        let kind = match r.read_i32::<BigEndian>() {
            Ok(kind) => kind,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let data_type = r.read_i32::<BigEndian>()?;
        let size = r.read_i32::<BigEndian>()?;
        let _next = r.read_i32::<BigEndian>()?;
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative FIFF tag size"))?;
        let mut data = vec![0u8; size];
        r.read_exact(&mut data)?;
        tags.push(Tag {
            kind,
            data_type,
            data,
        });
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epochs::{extract_epochs, EpochWindow};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn info(names: &[&str], sfreq: f64) -> MeasInfo {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let date = Utc.with_ymd_and_hms(2020, 1, 13, 14, 5, 0).unwrap();
        MeasInfo::new(&names, sfreq, date, "test session")
    }

    fn matrix(nchan: usize, nsamp: usize) -> SampleMatrix {
        SampleMatrix::from_shape_fn((nchan, nsamp), |(ch, s)| (ch * 100 + s) as f32)
    }

    #[test]
    fn test_channel_type_inference() {
        assert_eq!(ChannelType::from_name("ECG"), ChannelType::Ecg);
        assert_eq!(ChannelType::from_name("ekg2"), ChannelType::Ecg);
        assert_eq!(ChannelType::from_name("EMG1"), ChannelType::Emg);
        assert_eq!(ChannelType::from_name("TRIGGER"), ChannelType::Stim);
        assert_eq!(ChannelType::from_name("O2"), ChannelType::Eeg);
        assert_eq!(ChannelType::Eeg.fiff_kind(), 2);
    }

    #[test]
    fn test_raw_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s_raw.fif");
        write_raw(&path, &matrix(3, 25), &info(&["Fp1", "EOG", "STI 014"], 10.0)).unwrap();

        let tags = read_tags(&path).unwrap();
        assert_eq!(tags[0].kind, tag::FILE_ID);
        assert_eq!(tags[0].data.len(), 20);
        assert_eq!(tags[1].kind, tag::DIR_POINTER);
        assert_eq!(tags[1].as_i32s(), vec![-1]);

        let nchan = tags.iter().find(|t| t.kind == tag::NCHAN).unwrap();
        assert_eq!(nchan.as_i32s(), vec![3]);
        let sfreq = tags.iter().find(|t| t.kind == tag::SFREQ).unwrap();
        assert_eq!(sfreq.as_f32s(), vec![10.0]);

        let chs: Vec<&Tag> = tags.iter().filter(|t| t.kind == tag::CH_INFO).collect();
        assert_eq!(chs.len(), 3);
        assert_eq!(chs[1].ch_name().as_deref(), Some("EOG"));
        assert_eq!(chs[1].ch_kind(), Some(202));
        assert_eq!(chs[2].ch_kind(), Some(3));

        // 25 samples at 10 Hz: buffers of 10, 10, 5
        let buffers: Vec<&Tag> = tags.iter().filter(|t| t.kind == tag::DATA_BUFFER).collect();
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[2].matrix_dims(), Some(vec![5, 3]));
        let first = buffers[0].matrix_f32s().unwrap();
        // Sample-major: sample 1, channel 2
        assert_eq!(first[3 + 2], 201.0);

        let starts = tags.iter().filter(|t| t.kind == tag::BLOCK_START).count();
        let ends = tags.iter().filter(|t| t.kind == tag::BLOCK_END).count();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_event_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s-eve.fif");
        let events = [
            AlignedEvent {
                chunk_index: 5,
                code: 7,
                timestamp: 1.0,
                sample_index: 125,
            },
            AlignedEvent {
                chunk_index: 9,
                code: 2,
                timestamp: 2.0,
                sample_index: 225,
            },
        ];
        write_events(&path, &events, Utc::now()).unwrap();

        let tags = read_tags(&path).unwrap();
        let list = tags.iter().find(|t| t.kind == tag::MNE_EVENT_LIST).unwrap();
        assert_eq!(list.as_i32s(), vec![125, 0, 7, 225, 0, 2]);
    }

    #[test]
    fn test_epoch_matrix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s-epo.fif");
        let events = [AlignedEvent {
            chunk_index: 1,
            code: 1,
            timestamp: 0.0,
            sample_index: 10,
        }];
        let epochs = extract_epochs(&matrix(2, 30), &events, 10.0, EpochWindow::new(-0.2, 0.5))
            .unwrap();
        write_epochs(&path, &epochs, &info(&["C3", "C4"], 10.0)).unwrap();

        let tags = read_tags(&path).unwrap();
        let epoch = tags.iter().find(|t| t.kind == tag::EPOCH).unwrap();
        assert_eq!(epoch.matrix_dims(), Some(vec![1, 2, 8]));
        let values = epoch.matrix_f32s().unwrap();
        assert_eq!(values[0], 8.0);
        assert_eq!(values[8], 108.0);

        let first = tags.iter().find(|t| t.kind == tag::FIRST_SAMPLE).unwrap();
        let last = tags.iter().find(|t| t.kind == tag::LAST_SAMPLE).unwrap();
        assert_eq!(first.as_i32s(), vec![-2]);
        assert_eq!(last.as_i32s(), vec![5]);
    }

    #[test]
    fn test_channel_count_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let err = write_raw(&dir.path().join("x.fif"), &matrix(2, 5), &info(&["Fp1"], 10.0))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}

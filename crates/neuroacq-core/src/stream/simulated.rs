//! In-process simulated telemetry network
//!
//! Stands in for the external discovery service during demos and soak tests:
//! - Biosignal outlets run a "board" thread that emits samples at the nominal
//!   rate, quantized like a 24-bit ADC (OpenBCI Cyton scale factor)
//! - Marker outlets emit integer event codes at a fixed interval
//! - Each outlet stamps samples with its own skewed clock, which subscribers
//!   undo through `time_correction`
//!
//! Samples travel over bounded crossbeam channels. When nobody drains an
//! outlet its newest samples are discarded, like a device-side ring buffer.

use super::{InletError, MarkerSample, PulledChunk, StreamInfo, StreamInlet, StreamResolver};
use crate::clock::local_clock;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Microvolts per ADC count on the Cyton board: Vref / gain / (2^23 - 1)
pub const CYTON_SCALE_UV_PER_COUNT: f64 = 4_500_000.0 / 24.0 / 8_388_607.0;

/// Seconds of samples an outlet keeps before dropping new ones
const OUTLET_BUFFER_SECS: f64 = 60.0;

/// Board thread wake-up period
const BOARD_TICK: Duration = Duration::from_millis(2);

/// Resolution retry period while waiting for an outlet to appear
const RESOLVE_RETRY: Duration = Duration::from_millis(10);

/// Standard 8-channel montage of the demo board
const OPENBCI_LABELS: [&str; 8] = ["Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2"];

/// Configuration of a simulated biosignal outlet
#[derive(Debug, Clone)]
pub struct BiosignalOutletConfig {
    pub name: String,
    pub stream_type: String,
    pub source_id: String,
    pub channel_labels: Vec<String>,
    pub nominal_rate_hz: f64,
    /// Offset of the outlet clock relative to the local clock (seconds)
    pub clock_skew: f64,
    /// Peak amplitude of the rhythmic component (µV)
    pub amplitude_uv: f64,
    /// Peak amplitude of the broadband noise (µV)
    pub noise_uv: f64,
    /// Peak timestamp jitter (seconds)
    pub timestamp_jitter: f64,
}

impl BiosignalOutletConfig {
    /// The 8-channel, 250 Hz demo board published as `OpenBCIEEG`
    pub fn openbci() -> Self {
        Self {
            name: "OpenBCIEEG".to_string(),
            stream_type: "EEG".to_string(),
            source_id: "OpenBCItestEEG".to_string(),
            channel_labels: OPENBCI_LABELS.iter().map(|s| s.to_string()).collect(),
            nominal_rate_hz: 250.0,
            clock_skew: 0.0,
            amplitude_uv: 20.0,
            noise_uv: 5.0,
            timestamp_jitter: 0.0005,
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.name.clone(),
            stream_type: self.stream_type.clone(),
            source_id: self.source_id.clone(),
            channel_count: self.channel_labels.len(),
            nominal_rate_hz: self.nominal_rate_hz,
            channel_labels: self.channel_labels.clone(),
        }
    }
}

/// Configuration of a simulated marker outlet
#[derive(Debug, Clone)]
pub struct MarkerOutletConfig {
    pub name: String,
    pub source_id: String,
    /// Codes emitted in rotation
    pub codes: Vec<i32>,
    pub interval: Duration,
    pub clock_skew: f64,
}

impl MarkerOutletConfig {
    /// Stimulus markers published next to the demo board
    pub fn demo() -> Self {
        Self {
            name: "Markers".to_string(),
            source_id: "neuroacq-markers".to_string(),
            codes: vec![1, 2],
            interval: Duration::from_millis(1500),
            clock_skew: 0.0,
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.name.clone(),
            stream_type: "Markers".to_string(),
            source_id: self.source_id.clone(),
            channel_count: 1,
            nominal_rate_hz: 0.0,
            channel_labels: Vec::new(),
        }
    }
}

/// Stops an outlet's thread when dropped
pub struct OutletHandle {
    name: String,
    stop_flag: Arc<AtomicBool>,
    /// Samples discarded because the outlet buffer was full
    overflowed: Arc<AtomicU64>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OutletHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the outlet thread and wait for it to finish
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
            tracing::debug!(stream = %self.name, "Outlet stopped");
        }
    }

    /// Whether the outlet thread is still running
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Samples discarded because no subscriber drained them in time
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl Drop for OutletHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
enum Feed {
    Samples(Receiver<(Vec<f32>, f64)>),
    Markers(Receiver<MarkerSample>),
}

struct Published {
    info: StreamInfo,
    feed: Feed,
    clock_skew: f64,
    stopped: Arc<AtomicBool>,
}

/// Pub/sub network whose outlets live in this process
#[derive(Default)]
pub struct SimulatedNetwork {
    outlets: Mutex<Vec<Published>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network with the demo board and, optionally, the demo marker outlet
    ///
    /// The returned handles keep the outlets running.
    pub fn openbci_demo(with_markers: bool) -> std::io::Result<(Self, Vec<OutletHandle>)> {
        let net = Self::new();
        let mut handles = vec![net.publish_biosignal(BiosignalOutletConfig::openbci())?];
        if with_markers {
            handles.push(net.publish_markers(MarkerOutletConfig::demo())?);
        }
        Ok((net, handles))
    }

    /// Start a biosignal outlet
    ///
    /// # Arguments
    /// * `config` - Stream metadata and signal shape
    ///
    /// # Returns
    /// Handle that stops the board thread when dropped
    pub fn publish_biosignal(
        &self,
        config: BiosignalOutletConfig,
    ) -> std::io::Result<OutletHandle> {
        let capacity = ((config.nominal_rate_hz * OUTLET_BUFFER_SECS) as usize).max(1);
        let (tx, rx) = bounded(capacity);
        let info = config.info();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let overflowed = Arc::new(AtomicU64::new(0));
        let board = Board::new(config.clone());

        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let overflowed = Arc::clone(&overflowed);
            std::thread::Builder::new()
                .name(format!("outlet-{}", config.name))
                .spawn(move || board.run(tx, stop_flag, overflowed))?
        };

        tracing::info!(
            stream = %info.name,
            channels = info.channel_count,
            rate_hz = info.nominal_rate_hz,
            skew = config.clock_skew,
            "Biosignal outlet published"
        );

        self.register(Published {
            info,
            feed: Feed::Samples(rx),
            clock_skew: config.clock_skew,
            stopped: Arc::clone(&stop_flag),
        });

        Ok(OutletHandle {
            name: config.name,
            stop_flag,
            overflowed,
            thread: Some(thread),
        })
    }

    /// Start a marker outlet
    pub fn publish_markers(&self, config: MarkerOutletConfig) -> std::io::Result<OutletHandle> {
        let (tx, rx) = bounded(1024);
        let info = config.info();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let overflowed = Arc::new(AtomicU64::new(0));

        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let overflowed = Arc::clone(&overflowed);
            let config = config.clone();
            std::thread::Builder::new()
                .name(format!("outlet-{}", config.name))
                .spawn(move || marker_loop(config, tx, stop_flag, overflowed))?
        };

        tracing::info!(
            stream = %info.name,
            interval_ms = config.interval.as_millis() as u64,
            "Marker outlet published"
        );

        self.register(Published {
            info,
            feed: Feed::Markers(rx),
            clock_skew: config.clock_skew,
            stopped: Arc::clone(&stop_flag),
        });

        Ok(OutletHandle {
            name: config.name,
            stop_flag,
            overflowed,
            thread: Some(thread),
        })
    }

    /// Metadata of every running outlet
    pub fn streams(&self) -> Vec<StreamInfo> {
        match self.outlets.lock() {
            Ok(outlets) => outlets
                .iter()
                .filter(|p| !p.stopped.load(Ordering::Acquire))
                .map(|p| p.info.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn register(&self, published: Published) {
        match self.outlets.lock() {
            Ok(mut outlets) => outlets.push(published),
            Err(poisoned) => poisoned.into_inner().push(published),
        }
    }
}

impl StreamResolver for SimulatedNetwork {
    fn resolve(&self, name: &str, timeout: Duration) -> Result<Vec<StreamInfo>, InletError> {
        let deadline = Instant::now() + timeout;
        loop {
            let found: Vec<StreamInfo> = self
                .streams()
                .into_iter()
                .filter(|info| info.name == name)
                .collect();
            if !found.is_empty() || Instant::now() >= deadline {
                return Ok(found);
            }
            std::thread::sleep(RESOLVE_RETRY);
        }
    }

    fn open(
        &self,
        info: &StreamInfo,
        _max_chunk_len: usize,
    ) -> Result<Box<dyn StreamInlet>, InletError> {
        let outlets = self
            .outlets
            .lock()
            .map_err(|_| InletError::Backend("simulated network poisoned".to_string()))?;

        let published = outlets
            .iter()
            .find(|p| &p.info == info && !p.stopped.load(Ordering::Acquire))
            .ok_or(InletError::Disconnected)?;

        Ok(Box::new(SimulatedInlet {
            name: info.name.clone(),
            feed: Some(published.feed.clone()),
            correction: -published.clock_skew,
        }))
    }
}

struct SimulatedInlet {
    name: String,
    feed: Option<Feed>,
    correction: f64,
}

impl StreamInlet for SimulatedInlet {
    fn pull_chunk(
        &mut self,
        max_samples: usize,
        timeout: Duration,
    ) -> Result<PulledChunk, InletError> {
        let rx = match &self.feed {
            Some(Feed::Samples(rx)) => rx,
            Some(Feed::Markers(_)) => {
                return Err(InletError::Backend(format!(
                    "'{}' is not a biosignal stream",
                    self.name
                )))
            }
            None => return Err(InletError::Disconnected),
        };

        let deadline = Instant::now() + timeout;
        let mut chunk = PulledChunk::default();
        while chunk.len() < max_samples {
            match rx.recv_deadline(deadline) {
                Ok((sample, timestamp)) => {
                    chunk.samples.push(sample);
                    chunk.timestamps.push(timestamp);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) if chunk.is_empty() => {
                    return Err(InletError::Disconnected)
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(chunk)
    }

    fn pull_marker(&mut self, timeout: Duration) -> Result<Option<MarkerSample>, InletError> {
        let rx = match &self.feed {
            Some(Feed::Markers(rx)) => rx,
            Some(Feed::Samples(_)) => {
                return Err(InletError::Backend(format!(
                    "'{}' is not a marker stream",
                    self.name
                )))
            }
            None => return Err(InletError::Disconnected),
        };

        if timeout.is_zero() {
            match rx.try_recv() {
                Ok(marker) => Ok(Some(marker)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(InletError::Disconnected),
            }
        } else {
            match rx.recv_timeout(timeout) {
                Ok(marker) => Ok(Some(marker)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(InletError::Disconnected),
            }
        }
    }

    fn time_correction(&mut self, _timeout: Duration) -> Result<f64, InletError> {
        match self.feed {
            Some(_) => Ok(self.correction),
            None => Err(InletError::Disconnected),
        }
    }

    fn close(&mut self) {
        self.feed = None;
    }
}

/// Sample synthesizer for one biosignal outlet
struct Board {
    config: BiosignalOutletConfig,
    noise_seed: u32,
}

impl Board {
    fn new(config: BiosignalOutletConfig) -> Self {
        Self {
            config,
            noise_seed: 0xDEADBEEF,
        }
    }

    fn run(
        mut self,
        tx: Sender<(Vec<f32>, f64)>,
        stop_flag: Arc<AtomicBool>,
        overflowed: Arc<AtomicU64>,
    ) {
        let rate = self.config.nominal_rate_hz;
        let start = Instant::now();
        let t0 = local_clock() + self.config.clock_skew;
        let mut emitted: u64 = 0;

        while !stop_flag.load(Ordering::Acquire) {
            let due = (start.elapsed().as_secs_f64() * rate) as u64;
            while emitted < due {
                let sample = self.next_sample(emitted);
                let jitter = self.noise() as f64 * self.config.timestamp_jitter;
                let timestamp = t0 + emitted as f64 / rate + jitter;
                match tx.try_send((sample, timestamp)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        overflowed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
                emitted += 1;
            }
            std::thread::sleep(BOARD_TICK);
        }

        tracing::debug!(stream = %self.config.name, emitted, "Board thread exiting");
    }

    /// One sample across all channels, in µV after ADC quantization
    fn next_sample(&mut self, index: u64) -> Vec<f32> {
        let t = index as f64 / self.config.nominal_rate_hz;
        let channels = self.config.channel_labels.len();
        (0..channels)
            .map(|ch| {
                // Alpha-band rhythm with a per-channel phase shift
                let phase = ch as f64 * std::f64::consts::PI / channels.max(1) as f64;
                let rhythm = (2.0 * std::f64::consts::PI * 10.0 * t + phase).sin();
                let uv = self.config.amplitude_uv * rhythm
                    + self.config.noise_uv * self.noise() as f64;
                quantize(uv)
            })
            .collect()
    }

    /// White noise in -1.0..1.0 from an LCG
    fn noise(&mut self) -> f32 {
        self.noise_seed = self.noise_seed.wrapping_mul(1103515245).wrapping_add(12345);
        let bits = (self.noise_seed >> 16) & 0x7FFF;
        (bits as f32 / 16384.0) - 1.0
    }
}

/// Round a voltage to the nearest 24-bit ADC count and convert back to µV
fn quantize(uv: f64) -> f32 {
    let counts = (uv / CYTON_SCALE_UV_PER_COUNT)
        .round()
        .clamp(-8_388_608.0, 8_388_607.0);
    (counts * CYTON_SCALE_UV_PER_COUNT) as f32
}

fn marker_loop(
    config: MarkerOutletConfig,
    tx: Sender<MarkerSample>,
    stop_flag: Arc<AtomicBool>,
    overflowed: Arc<AtomicU64>,
) {
    if config.codes.is_empty() {
        return;
    }

    let mut next_at = Instant::now() + config.interval;
    let mut emitted = 0usize;
    while !stop_flag.load(Ordering::Acquire) {
        if Instant::now() >= next_at {
            let marker = MarkerSample {
                code: config.codes[emitted % config.codes.len()],
                timestamp: local_clock() + config.clock_skew,
            };
            match tx.try_send(marker) {
                Ok(()) => {
                    tracing::trace!(stream = %config.name, code = marker.code, "Marker pushed");
                }
                Err(TrySendError::Full(_)) => {
                    overflowed.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
            emitted += 1;
            next_at += config.interval;
        }
        std::thread::sleep(BOARD_TICK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_board(name: &str, skew: f64) -> BiosignalOutletConfig {
        BiosignalOutletConfig {
            name: name.to_string(),
            clock_skew: skew,
            nominal_rate_hz: 1000.0,
            timestamp_jitter: 0.0,
            ..BiosignalOutletConfig::openbci()
        }
    }

    #[test]
    fn test_quantize_stays_within_one_count() {
        for uv in [0.0, 1.0, -37.3, 250.25] {
            let q = quantize(uv) as f64;
            assert!((q - uv).abs() <= CYTON_SCALE_UV_PER_COUNT, "{} -> {}", uv, q);
        }
    }

    #[test]
    fn test_resolve_and_pull_chunk() {
        let net = SimulatedNetwork::new();
        let _outlet = net.publish_biosignal(fast_board("EEG", 0.0)).unwrap();

        let found = net.resolve("EEG", Duration::from_secs(1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].channel_count, 8);
        assert_eq!(found[0].channel_labels[0], "Fp1");

        let mut inlet = net.open(&found[0], 10).unwrap();
        let chunk = inlet.pull_chunk(10, Duration::from_secs(2)).unwrap();
        assert_eq!(chunk.len(), 10);
        assert_eq!(chunk.samples[0].len(), 8);
        assert!(chunk.timestamps.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_time_correction_undoes_skew() {
        let net = SimulatedNetwork::new();
        let _outlet = net.publish_biosignal(fast_board("Skewed", 100.0)).unwrap();
        let info = net.resolve("Skewed", Duration::from_secs(1)).unwrap().remove(0);
        let mut inlet = net.open(&info, 5).unwrap();

        let chunk = inlet.pull_chunk(5, Duration::from_secs(2)).unwrap();
        let correction = inlet.time_correction(Duration::ZERO).unwrap();
        assert_eq!(correction, -100.0);

        let local = chunk.timestamps[0] + correction;
        assert!((local - local_clock()).abs() < 1.0);
    }

    #[test]
    fn test_unknown_name_resolves_empty() {
        let net = SimulatedNetwork::new();
        let found = net.resolve("Nope", Duration::from_millis(20)).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_stopped_outlet_disconnects() {
        let net = SimulatedNetwork::new();
        let mut outlet = net.publish_biosignal(fast_board("EEG", 0.0)).unwrap();
        let info = net.resolve("EEG", Duration::from_secs(1)).unwrap().remove(0);
        let mut inlet = net.open(&info, 1_000_000).unwrap();

        outlet.stop();
        assert!(!outlet.is_alive());
        assert!(net.streams().is_empty());

        // Drain what was already emitted, then the feed reports disconnection
        let _ = inlet.pull_chunk(1_000_000, Duration::from_millis(50));
        let err = inlet.pull_chunk(10, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, InletError::Disconnected));
    }

    #[test]
    fn test_marker_outlet_emits_codes() {
        let net = SimulatedNetwork::new();
        let _outlet = net
            .publish_markers(MarkerOutletConfig {
                codes: vec![7],
                interval: Duration::from_millis(10),
                ..MarkerOutletConfig::demo()
            })
            .unwrap();
        let info = net.resolve("Markers", Duration::from_secs(1)).unwrap().remove(0);
        assert_eq!(info.kind(), crate::stream::StreamKind::Marker);

        let mut inlet = net.open(&info, 1).unwrap();
        let marker = inlet.pull_marker(Duration::from_secs(2)).unwrap();
        assert_eq!(marker.map(|m| m.code), Some(7));
        assert!(inlet.pull_chunk(1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_closed_inlet_reports_disconnected() {
        let net = SimulatedNetwork::new();
        let _outlet = net.publish_biosignal(fast_board("EEG", 0.0)).unwrap();
        let info = net.resolve("EEG", Duration::from_secs(1)).unwrap().remove(0);
        let mut inlet = net.open(&info, 5).unwrap();
        inlet.close();
        assert!(matches!(
            inlet.pull_chunk(5, Duration::ZERO),
            Err(InletError::Disconnected)
        ));
    }
}

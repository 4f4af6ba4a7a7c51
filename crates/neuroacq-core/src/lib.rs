//! Neuroacq Core - Biosignal stream acquisition and epoch assembly
//!
//! This library binds to network-published biosignal and marker streams,
//! polls them in fixed-size chunks for a bounded duration while tracking
//! dropped chunks, assembles the buffered chunks into a channel-major sample
//! matrix with aligned marker events, and writes the result to disk.
//!
//! Data flows one way:
//! [`stream::registry`] → [`acquisition`] → [`assembler`] → [`persist`]

pub mod acquisition;
pub mod assembler;
pub mod clock;
pub mod epochs;
pub mod error;
pub mod persist;
pub mod stats;
pub mod stream;

pub use acquisition::{AcquisitionConfig, AcquisitionLoop, AcquisitionRecord, StopSignal};
pub use assembler::{assemble, AcquisitionResult, AlignedEvent};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Error, Result};
pub use persist::Persister;
pub use stats::SessionSummary;
pub use stream::registry::{BoundStreams, StreamRegistry};
pub use stream::{StreamHandle, StreamKind};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Date this library was built
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default number of samples per biosignal chunk
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Default bound on a single biosignal poll (seconds)
pub const DEFAULT_POLL_TIMEOUT_SECS: f64 = 2.0;

/// Default bound on stream resolution (seconds)
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: f64 = 2.0;

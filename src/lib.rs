//! Neuroacq - biosignal stream acquisition and epoch assembly
//!
//! This library re-exports the acquisition pipeline from `neuroacq-core`
//! and adds the persistent session configuration used by the `neuroacq`
//! binary.

pub mod config;
pub mod session;

pub use neuroacq_core::{acquisition, assembler, clock, epochs, persist, stats, stream};

pub use neuroacq_core::{
    AcquisitionConfig, AcquisitionLoop, AcquisitionRecord, AcquisitionResult, Error, Persister,
    SessionSummary, StopSignal, StreamRegistry,
};
pub use neuroacq_core::{DEFAULT_CHUNK_SIZE, VERSION};

pub use config::SessionConfig;
pub use session::{run_session, SessionOutcome};

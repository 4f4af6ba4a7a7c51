//! Acquisition loop and its in-memory buffers
//!
//! - [`AcquisitionLoop`] polls a bound biosignal stream (and optional marker
//!   stream) for a bounded duration
//! - [`AcquisitionRecord`] holds the buffered chunks, marker events and drop
//!   log once the loop returns

pub mod buffer;
pub mod runner;

pub use buffer::{AcquisitionRecord, Chunk, DropLog, MarkerEvent};
pub use runner::{AcquisitionConfig, AcquisitionLoop, StopSignal};

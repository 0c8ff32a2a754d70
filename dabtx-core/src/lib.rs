//! DAB modulator core library
//!
//! This crate turns a stream of ETI frames (ETSI EN 300 799) into
//! complex baseband I/Q samples for an SDR front-end, time-aligned
//! to an external PPS/GNSS reference so that several transmitters
//! can form a single frequency network.
//!
//! The signal path follows ETSI EN 300 401: per-sub-channel energy
//! dispersal, convolutional coding with puncturing and time
//! interleaving, CIF assembly, QPSK mapping with frequency
//! interleaving and differential modulation against the phase
//! reference symbol, IFFT with guard-interval insertion, then gain
//! control and the optional FIR / predistortion / resampling stages
//! before the timestamped SDR output.

pub mod buffer;
pub mod coding;
pub mod controllable;
pub mod errors;
pub mod eti;
pub mod fft;
pub mod fir;
pub mod flowgraph;
pub mod format_converter;
pub mod gain;
pub mod input;
pub mod log;
pub mod modulator;
pub mod ofdm;
pub mod predistorter;
pub mod queue;
pub mod resampler;
pub mod sdr;
pub mod utils;

pub use buffer::Buffer;
pub use errors::{ModError, Result};
pub use eti::timestamp::FrameTimestamp;
pub use flowgraph::{Flowgraph, FrameMetadata, Stage};
pub use modulator::{Modulator, ModulatorConfig};

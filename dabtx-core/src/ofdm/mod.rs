//! OFDM transmission chain: symbol mapping, frequency interleaving,
//! differential modulation, phase reference, TII, IFFT and guard
//! intervals.

pub mod freq_interleaver;
pub mod generator;
pub mod guard;
pub mod mapper;
pub mod modulator;
pub mod params;
pub mod phase_ref;
pub mod tii;

//! SDR output: the abstract device contract, the queueing output
//! stage with its worker thread, GNSS clock supervision and the DPD
//! capture hook.

pub mod device;
pub mod feedback;
pub mod file;
pub mod gpsdo;
pub mod output;

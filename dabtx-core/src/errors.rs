//! Error types, one enum per failure domain.
//!
//! Stages never log; they fail by returning one of these to the
//! scheduler, which decides between retry, drop-and-count, and
//! shutdown.

use thiserror::Error;

/// Top-level error type for all modulator operations
#[derive(Debug, Error)]
pub enum ModError {
    #[error("ETI error: {0}")]
    Eti(#[from] EtiError),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("DSP processing error: {0}")]
    Dsp(#[from] DspError),

    #[error("SDR device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// ETI transport and framing errors
#[derive(Debug, Error)]
pub enum EtiError {
    /// Transient: the caller retries with more bytes.
    #[error("insufficient input: a full ETI frame is not yet available")]
    InsufficientInput,

    #[error("no ETI sync word found within {searched} bytes")]
    MalformedFrame { searched: usize },

    #[error("FIC must be present to modulate (FICF=0)")]
    FicMissing,

    #[error("unsupported sub-channel protection TPL={tpl:#04x}")]
    UnsupportedProtection { tpl: u8 },

    #[error("sub-channel STL {stl} does not match protection profile (bitrate {bitrate} kbit/s)")]
    ProtectionMismatch { stl: u16, bitrate: u32 },

    #[error("EDI packet malformed: {reason}")]
    EdiMalformed { reason: &'static str },
}

/// Per-frame timing errors at the SDR boundary
#[derive(Debug, Error)]
pub enum TimestampError {
    /// Counted and dropped; the pipeline continues.
    #[error("timestamp {offset_secs:.3} s in the past, frame dropped")]
    Late { offset_secs: f64 },

    /// Fatal once past the abort threshold.
    #[error("timestamp {offset_secs:.3} s in the future, aborting")]
    TooFarInFuture { offset_secs: f64 },

    #[error("external clock source lost")]
    ClockSourceLost,
}

/// DSP stage contract violations
#[derive(Debug, Error)]
pub enum DspError {
    #[error("invalid input size: expected {expected}, got {actual}")]
    InvalidInputSize { expected: usize, actual: usize },

    #[error("filter taps file invalid: {reason}")]
    InvalidTapsFile { reason: String },

    #[error("predistorter coefficient file invalid: {reason}")]
    InvalidCoefFile { reason: String },

    #[error("worker thread terminated unexpectedly")]
    WorkerGone,
}

/// Errors originating in the concrete SDR device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot open SDR device: {reason}")]
    CannotOpen { reason: String },

    #[error("device reported: {reason}")]
    Failed { reason: String },

    #[error("reference clock lock lost in crash mode")]
    RefclkLockLost,

    #[error("GPS holdover exceeded {seconds} s")]
    HoldoverTimeout { seconds: u32 },
}

/// Remote-control parameter errors
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter '{0}' is read-only")]
    ReadOnly(&'static str),

    #[error("no such parameter '{name}' on controllable '{controllable}'")]
    NotFound { controllable: String, name: String },

    #[error("no controllable named '{0}'")]
    NoSuchControllable(String),

    #[error("value '{value}' invalid for parameter '{name}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("parameter not available yet")]
    NotAvailable,
}

/// Startup-time configuration errors; never raised once running
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid DAB transmission mode {0} (must be 1..=4)")]
    InvalidMode(u8),

    #[error("invalid sample rate {rate} Hz")]
    InvalidSampleRate { rate: u64 },

    #[error("invalid TII setting: {reason}")]
    InvalidTii { reason: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for modulator operations
pub type Result<T> = std::result::Result<T, ModError>;

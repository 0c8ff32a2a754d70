//! Structured logging with a dedicated consumer thread.
//!
//! DSP stages do not log (they return errors); the scheduler and the
//! I/O workers emit records through a clonable [`Logger`] handle. A
//! single worker thread drains the channel and forwards records to
//! the registered backends, so backend I/O can never block the
//! signal path. Backends receive each record by reference and never
//! store the logger back.

use std::fmt;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Alert = 5,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Alert => "ALERT",
        };
        write!(f, "{}", s)
    }
}

/// A single log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub subsystem: &'static str,
    pub message: String,
}

/// Narrow sink interface; concrete backends (syslog, files, ...) are
/// external collaborators implementing this.
pub trait LogBackend: Send {
    fn log(&mut self, record: &LogRecord);
}

/// Backend writing `[LEVEL] SUBSYSTEM: message` lines to stderr.
pub struct StderrBackend;

impl LogBackend for StderrBackend {
    fn log(&mut self, record: &LogRecord) {
        eprintln!("[{}] {}: {}", record.level, record.subsystem, record.message);
    }
}

/// Clonable producer handle.
#[derive(Clone)]
pub struct Logger {
    tx: Option<Sender<LogRecord>>,
    min_level: LogLevel,
}

impl Logger {
    /// A logger that drops every record; used in tests and by
    /// stages constructed without a context.
    pub fn disabled() -> Self {
        Logger { tx: None, min_level: LogLevel::Alert }
    }

    pub fn log(&self, level: LogLevel, subsystem: &'static str, message: impl fmt::Display) {
        if level < self.min_level {
            return;
        }
        if let Some(tx) = &self.tx {
            // The worker owning the receiver may already be gone
            // during shutdown; records are best-effort then.
            let _ = tx.send(LogRecord {
                level,
                subsystem,
                message: message.to_string(),
            });
        }
    }

    pub fn trace(&self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Trace, subsystem, message);
    }

    pub fn debug(&self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Debug, subsystem, message);
    }

    pub fn info(&self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Info, subsystem, message);
    }

    pub fn warn(&self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Warn, subsystem, message);
    }

    pub fn error(&self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Error, subsystem, message);
    }
}

/// Owns the worker thread draining the channel. The worker exits
/// once every [`Logger`] clone has been dropped.
pub struct LogRouter {
    _handle: JoinHandle<()>,
}

impl LogRouter {
    pub fn spawn(min_level: LogLevel, backends: Vec<Box<dyn LogBackend>>) -> (Self, Logger) {
        let (tx, rx): (Sender<LogRecord>, Receiver<LogRecord>) = unbounded();
        let handle = std::thread::Builder::new()
            .name("logworker".into())
            .spawn(move || {
                let mut backends = backends;
                while let Ok(record) = rx.recv() {
                    for b in backends.iter_mut() {
                        b.log(&record);
                    }
                }
            })
            .expect("spawn log worker");
        let logger = Logger {
            tx: Some(tx),
            min_level,
        };
        (LogRouter { _handle: handle }, logger)
    }
}

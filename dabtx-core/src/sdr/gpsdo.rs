//! GNSS-disciplined clock supervision.
//!
//! Runs alongside the output worker:
//!
//! - Startup: wait for the reference to report healthy, then
//!   snapshot (UTC seconds, device clock) across a one-second
//!   boundary and verify the increment before trusting it.
//! - Normal: a healthy reference, until PPS loss.
//! - Holdover: reference lost; back to Normal if it returns within
//!   the configured window, otherwise back to Startup (forcing a
//!   resync) or a terminal error in crash mode.

use std::time::{Duration, Instant};

use crate::errors::{DeviceError, Result};
use crate::sdr::device::{RefclkLossBehaviour, SdrDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Startup,
    Normal,
    Holdover,
}

/// What the output worker should do with the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockVerdict {
    /// Reference healthy; transmit.
    Run,
    /// Not (yet) aligned; sleep through the frame.
    Mute,
}

#[derive(Debug, Clone, Copy)]
pub struct ClockSnapshot {
    pub utc_seconds_at_startup: u32,
    pub device_clock_at_startup: f64,
}

pub struct GpsdoMonitor {
    state: ClockState,
    behaviour: RefclkLossBehaviour,
    max_holdover: Duration,
    holdover_since: Option<Instant>,
    snapshot: Option<ClockSnapshot>,
}

impl GpsdoMonitor {
    pub fn new(behaviour: RefclkLossBehaviour, max_holdover_secs: u32) -> Self {
        GpsdoMonitor {
            state: ClockState::Startup,
            behaviour,
            max_holdover: Duration::from_secs(max_holdover_secs as u64),
            holdover_since: None,
            snapshot: None,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        self.snapshot
    }

    /// Holdover flag for the observability parameters.
    pub fn in_holdover(&self) -> bool {
        self.state == ClockState::Holdover
    }

    /// Advance the state machine with the current reference health.
    pub fn step(
        &mut self,
        device: &mut dyn SdrDevice,
        utc_now: u32,
        now: Instant,
    ) -> Result<ClockVerdict> {
        let clk_ok = device.is_clk_source_ok();
        match self.state {
            ClockState::Startup => {
                if !clk_ok {
                    return Ok(ClockVerdict::Mute);
                }
                self.snapshot = Some(Self::snapshot_pps(device, utc_now)?);
                self.state = ClockState::Normal;
                Ok(ClockVerdict::Run)
            }
            ClockState::Normal => {
                if clk_ok {
                    Ok(ClockVerdict::Run)
                } else {
                    self.state = ClockState::Holdover;
                    self.holdover_since = Some(now);
                    Ok(ClockVerdict::Run)
                }
            }
            ClockState::Holdover => {
                if clk_ok {
                    self.state = ClockState::Normal;
                    self.holdover_since = None;
                    return Ok(ClockVerdict::Run);
                }
                let since = self.holdover_since.unwrap_or(now);
                if self.max_holdover.is_zero() || now.duration_since(since) <= self.max_holdover
                {
                    // Free-running within the allowed window.
                    return Ok(ClockVerdict::Run);
                }
                match self.behaviour {
                    RefclkLossBehaviour::Crash => Err(DeviceError::HoldoverTimeout {
                        seconds: self.max_holdover.as_secs() as u32,
                    }
                    .into()),
                    RefclkLossBehaviour::Ignore => {
                        // Force a resync; mute until it completes.
                        self.state = ClockState::Startup;
                        self.holdover_since = None;
                        self.snapshot = None;
                        Ok(ClockVerdict::Mute)
                    }
                }
            }
        }
    }

    /// Observe the device clock across one second boundary and
    /// check that exactly one second elapsed.
    fn snapshot_pps(device: &mut dyn SdrDevice, utc_now: u32) -> Result<ClockSnapshot> {
        let start = device.get_real_secs();
        let start_sec = start.floor();
        let deadline = Instant::now() + Duration::from_millis(1500);
        loop {
            let now = device.get_real_secs();
            if now.floor() > start_sec {
                let elapsed = now - start;
                if elapsed > 1.5 {
                    return Err(DeviceError::Failed {
                        reason: format!(
                            "device clock jumped by {:.3} s across the PPS boundary",
                            elapsed
                        ),
                    }
                    .into());
                }
                return Ok(ClockSnapshot {
                    utc_seconds_at_startup: utc_now,
                    device_clock_at_startup: now,
                });
            }
            if Instant::now() > deadline {
                return Err(DeviceError::Failed {
                    reason: "device clock did not advance across a second boundary".into(),
                }
                .into());
            }
            std::thread::sleep(Duration::from_micros(500));
        }
    }
}

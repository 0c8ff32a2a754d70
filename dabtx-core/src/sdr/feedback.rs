//! DPD feedback capture hook.
//!
//! An external learning tool asks for a burst; the output stage
//! publishes the outgoing TX samples with their timestamp through
//! [`DpdFeedback::set_tx_frame`], and the receive helper arranges a
//! matching RX capture at the same hardware time. Serving the
//! captured burst to the tool is outside the core.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use num_complex::Complex32;

use crate::errors::Result;
use crate::eti::timestamp::FrameTimestamp;
use crate::sdr::device::SdrDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstRequestState {
    /// No pending request.
    None,
    /// The TX path has to save the next outgoing frame.
    SaveTransmitFrame,
    /// The RX side has to capture the matching samples.
    SaveReceiveFrame,
    /// Both halves are ready for pickup.
    Acquired,
}

#[derive(Debug, Default, Clone)]
pub struct Burst {
    pub num_samples: usize,
    pub tx_second: u32,
    pub tx_pps: u32,
    pub tx_samples: Vec<Complex32>,
    pub rx_second: u32,
    pub rx_pps: u32,
    pub rx_samples: Vec<Complex32>,
}

struct Shared {
    state: BurstRequestState,
    num_samples: usize,
    burst: Burst,
}

/// Clonable handle shared between the output stage, the RX capture
/// helper and the external serving plane.
#[derive(Clone)]
pub struct DpdFeedback {
    shared: Arc<(Mutex<Shared>, Condvar)>,
}

impl DpdFeedback {
    pub fn new() -> Self {
        DpdFeedback {
            shared: Arc::new((
                Mutex::new(Shared {
                    state: BurstRequestState::None,
                    num_samples: 0,
                    burst: Burst::default(),
                }),
                Condvar::new(),
            )),
        }
    }

    /// Ask for a burst of `num_samples` TX/RX samples.
    pub fn request_burst(&self, num_samples: usize) {
        let (lock, cv) = &*self.shared;
        let mut shared = lock.lock().unwrap();
        shared.num_samples = num_samples;
        shared.burst = Burst {
            num_samples,
            ..Burst::default()
        };
        shared.state = BurstRequestState::SaveTransmitFrame;
        cv.notify_all();
    }

    /// Called by the output stage for every outgoing frame; copies
    /// the head of the frame when a request is pending.
    pub fn set_tx_frame(&self, buf: &[Complex32], ts: &FrameTimestamp) {
        let (lock, cv) = &*self.shared;
        let mut shared = lock.lock().unwrap();
        if shared.state != BurstRequestState::SaveTransmitFrame {
            return;
        }
        let n = shared.num_samples.min(buf.len());
        shared.burst.tx_samples = buf[..n].to_vec();
        shared.burst.tx_second = ts.utc_seconds;
        shared.burst.tx_pps = ts.pps_ticks;
        shared.state = BurstRequestState::SaveReceiveFrame;
        cv.notify_all();
    }

    /// Capture the RX half at the TX hardware time. Runs on the RX
    /// thread owned by the external capture plane.
    pub fn receive_burst(&self, device: &mut dyn SdrDevice, timeout: Duration) -> Result<bool> {
        let pending = {
            let (lock, _) = &*self.shared;
            let shared = lock.lock().unwrap();
            if shared.state != BurstRequestState::SaveReceiveFrame {
                return Ok(false);
            }
            (
                shared.num_samples,
                shared.burst.tx_second,
                shared.burst.tx_pps,
            )
        };
        let (num_samples, tx_second, tx_pps) = pending;

        let mut rx = vec![Complex32::new(0.0, 0.0); num_samples];
        let mut ts = FrameTimestamp {
            utc_seconds: tx_second,
            pps_ticks: tx_pps,
            valid: true,
            refresh: false,
            fct: 0,
            fp: 0,
        };
        let got = device.receive_frame(&mut rx, &mut ts, timeout)?;
        rx.truncate(got);

        let (lock, cv) = &*self.shared;
        let mut shared = lock.lock().unwrap();
        shared.burst.rx_samples = rx;
        shared.burst.rx_second = ts.utc_seconds;
        shared.burst.rx_pps = ts.pps_ticks;
        shared.state = BurstRequestState::Acquired;
        cv.notify_all();
        Ok(true)
    }

    /// Wait for a complete burst; gives up after `timeout` (one
    /// frame interval in practice).
    pub fn wait_for_burst(&self, timeout: Duration) -> Option<Burst> {
        let (lock, cv) = &*self.shared;
        let mut shared = lock.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while shared.state != BurstRequestState::Acquired {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let (guard, result) = cv.wait_timeout(shared, remaining).unwrap();
            shared = guard;
            if result.timed_out() && shared.state != BurstRequestState::Acquired {
                return None;
            }
        }
        shared.state = BurstRequestState::None;
        Some(std::mem::take(&mut shared.burst))
    }

    pub fn state(&self) -> BurstRequestState {
        self.shared.0.lock().unwrap().state
    }
}

impl Default for DpdFeedback {
    fn default() -> Self {
        DpdFeedback::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdr::device::mock::MockSdrDevice;

    fn ts(sec: u32, pps: u32) -> FrameTimestamp {
        FrameTimestamp {
            utc_seconds: sec,
            pps_ticks: pps,
            valid: true,
            refresh: false,
            fct: 0,
            fp: 0,
        }
    }

    #[test]
    fn test_idle_hook_is_a_noop() {
        let feedback = DpdFeedback::new();
        feedback.set_tx_frame(&[Complex32::new(1.0, 0.0)], &ts(1, 2));
        assert_eq!(feedback.state(), BurstRequestState::None);
    }

    #[test]
    fn test_burst_acquisition_sequence() {
        let feedback = DpdFeedback::new();
        feedback.request_burst(4);
        assert_eq!(feedback.state(), BurstRequestState::SaveTransmitFrame);

        let samples: Vec<Complex32> =
            (0..16).map(|i| Complex32::new(i as f32, 0.0)).collect();
        feedback.set_tx_frame(&samples, &ts(100, 5000));
        assert_eq!(feedback.state(), BurstRequestState::SaveReceiveFrame);

        let mut device = MockSdrDevice::new(0.0);
        assert!(feedback
            .receive_burst(&mut device, Duration::from_millis(10))
            .unwrap());
        assert_eq!(feedback.state(), BurstRequestState::Acquired);

        let burst = feedback.wait_for_burst(Duration::from_millis(10)).unwrap();
        assert_eq!(burst.tx_samples.len(), 4);
        assert_eq!(burst.tx_second, 100);
        assert_eq!(burst.tx_pps, 5000);
        assert_eq!(burst.rx_samples.len(), 4);
        assert_eq!(feedback.state(), BurstRequestState::None);
    }

    #[test]
    fn test_wait_for_burst_times_out() {
        let feedback = DpdFeedback::new();
        feedback.request_burst(8);
        assert!(feedback.wait_for_burst(Duration::from_millis(20)).is_none());
    }
}

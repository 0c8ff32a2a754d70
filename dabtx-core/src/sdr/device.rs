//! Abstract SDR device contract.
//!
//! Concrete drivers (UHD, SoapySDR, Lime, ...) live outside the
//! core; everything here talks to this capability set only.

use std::time::Duration;

use num_complex::Complex32;

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::eti::timestamp::FrameTimestamp;

/// What to do when the reference clock PLL loses lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefclkLossBehaviour {
    Crash,
    Ignore,
}

/// Initial configuration for the output stage and device; also
/// holds every remote-controllable setting so a modulator restart
/// does not lose them.
#[derive(Debug, Clone)]
pub struct SdrConfig {
    pub device: String,
    pub sample_rate: u32,
    pub frequency: f64,
    pub lo_offset: f64,
    pub txgain: f64,
    pub rxgain: f64,
    pub bandwidth: f64,
    /// Hardware-timed transmission against the ETI timestamps.
    pub enable_sync: bool,
    /// Mute frames whose timestamp never became valid.
    pub mute_no_timestamps: bool,
    pub dab_mode: u8,
    /// Seconds of GNSS holdover tolerated before resync; zero
    /// disables the check.
    pub max_gps_holdover_time: u32,
    pub refclk_loss_behaviour: RefclkLossBehaviour,
}

impl Default for SdrConfig {
    fn default() -> Self {
        SdrConfig {
            device: String::new(),
            sample_rate: 2_048_000,
            frequency: 0.0,
            lo_offset: 0.0,
            txgain: 0.0,
            rxgain: 0.0,
            bandwidth: 0.0,
            enable_sync: false,
            mute_no_timestamps: false,
            dab_mode: 0,
            max_gps_holdover_time: 0,
            refclk_loss_behaviour: RefclkLossBehaviour::Ignore,
        }
    }
}

/// One transmission frame with its timestamp.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub buf: Buffer,
    pub ts: FrameTimestamp,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunStatistics {
    pub num_underruns: u64,
    pub num_overruns: u64,
    pub num_frames_transmitted: u64,
}

pub trait SdrDevice: Send {
    fn device_name(&self) -> &str;

    fn tune(&mut self, lo_offset: f64, frequency: f64) -> Result<()>;

    fn get_tx_freq(&self) -> f64;

    fn set_txgain(&mut self, gain: f64);

    fn get_txgain(&self) -> f64;

    fn set_rxgain(&mut self, gain: f64);

    fn get_rxgain(&self) -> f64;

    fn set_bandwidth(&mut self, bandwidth: f64);

    fn get_bandwidth(&self) -> f64;

    /// Hand samples to the hardware, applying the frame timestamp
    /// when timestamping is active. The device may split the frame
    /// into MTU-sized bursts internally and sets end-of-burst when
    /// the next frame re-times or when muting.
    fn transmit_frame(&mut self, frame: FrameData) -> Result<()>;

    /// Capture samples for DPD feedback at the given hardware time.
    fn receive_frame(
        &mut self,
        buf: &mut [Complex32],
        ts: &mut FrameTimestamp,
        timeout: Duration,
    ) -> Result<usize>;

    /// Device time in seconds since the device epoch.
    fn get_real_secs(&self) -> f64;

    /// True iff external reference and PPS inputs are healthy.
    fn is_clk_source_ok(&mut self) -> bool;

    fn get_temperature(&self) -> Option<f64>;

    fn get_run_statistics(&self) -> RunStatistics;

    /// The next frame must re-establish hardware time alignment.
    fn require_timestamp_refresh(&mut self);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Test double with a settable clock, recording transmissions.
    pub struct MockSdrDevice {
        pub transmitted: Arc<Mutex<Vec<FrameData>>>,
        pub clock: Arc<Mutex<f64>>,
        pub clk_ok: Arc<AtomicBool>,
        pub refresh_requests: Arc<Mutex<u32>>,
        pub stats: Arc<Mutex<RunStatistics>>,
        txgain: f64,
        rxgain: f64,
        bandwidth: f64,
        frequency: f64,
    }

    impl MockSdrDevice {
        pub fn new(clock: f64) -> Self {
            MockSdrDevice {
                transmitted: Arc::new(Mutex::new(Vec::new())),
                clock: Arc::new(Mutex::new(clock)),
                clk_ok: Arc::new(AtomicBool::new(true)),
                refresh_requests: Arc::new(Mutex::new(0)),
                stats: Arc::new(Mutex::new(RunStatistics::default())),
                txgain: 0.0,
                rxgain: 0.0,
                bandwidth: 0.0,
                frequency: 0.0,
            }
        }
    }

    impl SdrDevice for MockSdrDevice {
        fn device_name(&self) -> &str {
            "mock"
        }

        fn tune(&mut self, lo_offset: f64, frequency: f64) -> Result<()> {
            self.frequency = frequency - lo_offset;
            Ok(())
        }

        fn get_tx_freq(&self) -> f64 {
            self.frequency
        }

        fn set_txgain(&mut self, gain: f64) {
            self.txgain = gain;
        }

        fn get_txgain(&self) -> f64 {
            self.txgain
        }

        fn set_rxgain(&mut self, gain: f64) {
            self.rxgain = gain;
        }

        fn get_rxgain(&self) -> f64 {
            self.rxgain
        }

        fn set_bandwidth(&mut self, bandwidth: f64) {
            self.bandwidth = bandwidth;
        }

        fn get_bandwidth(&self) -> f64 {
            self.bandwidth
        }

        fn transmit_frame(&mut self, frame: FrameData) -> Result<()> {
            self.stats.lock().unwrap().num_frames_transmitted += 1;
            self.transmitted.lock().unwrap().push(frame);
            Ok(())
        }

        fn receive_frame(
            &mut self,
            buf: &mut [Complex32],
            ts: &mut FrameTimestamp,
            _timeout: Duration,
        ) -> Result<usize> {
            buf.fill(Complex32::new(0.0, 0.0));
            ts.valid = true;
            Ok(buf.len())
        }

        fn get_real_secs(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn is_clk_source_ok(&mut self) -> bool {
            self.clk_ok.load(Ordering::Relaxed)
        }

        fn get_temperature(&self) -> Option<f64> {
            Some(42.0)
        }

        fn get_run_statistics(&self) -> RunStatistics {
            *self.stats.lock().unwrap()
        }

        fn require_timestamp_refresh(&mut self) {
            *self.refresh_requests.lock().unwrap() += 1;
        }
    }
}

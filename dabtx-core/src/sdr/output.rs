//! The SDR output stage.
//!
//! Frames queue into an 8-deep bounded queue; a worker thread pops
//! them, validates timestamps against the device clock, supervises
//! the GNSS reference and hands the samples to the device. After an
//! underrun the worker refills the queue before resuming; outside
//! of underruns it resumes on the first queued frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::controllable::{parse_value, Controllable, Parameter};
use crate::errors::{DeviceError, ParameterError, Result, TimestampError};
use crate::eti::timestamp::TICKS_PER_SECOND;
use crate::flowgraph::{FrameMetadata, ModOutput};
use crate::log::Logger;
use crate::ofdm::params::OfdmParams;
use crate::queue::{Pop, ThreadsafeQueue};
use crate::sdr::device::{FrameData, SdrConfig, SdrDevice};
use crate::sdr::feedback::DpdFeedback;
use crate::sdr::gpsdo::{ClockVerdict, GpsdoMonitor};
use crate::utils::{set_realtime_prio, set_thread_name};

/// Maximum number of frames waiting in the queue.
const FRAMES_MAX_SIZE: usize = 8;

/// Abort when a timestamp lies further in the future than this.
const TIMESTAMP_ABORT_FUTURE: f64 = 100.0;

/// Frames older than this against the device clock are dropped.
const TX_TIMEOUT: f64 = 20.0;

struct Counters {
    underruns: AtomicU64,
    late: AtomicU64,
    frames: AtomicU64,
    dropped_no_metadata: AtomicU64,
    muting: AtomicBool,
    holdover: AtomicBool,
}

pub struct SdrOutput {
    name: String,
    config: SdrConfig,
    queue: Arc<ThreadsafeQueue<FrameData>>,
    device: Arc<Mutex<Box<dyn SdrDevice>>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    feedback: Option<DpdFeedback>,
}

impl SdrOutput {
    pub fn new(
        config: SdrConfig,
        device: Box<dyn SdrDevice>,
        feedback: Option<DpdFeedback>,
        logger: Logger,
    ) -> Self {
        let name = format!("OutputSDR({})", device.device_name());
        let queue = Arc::new(ThreadsafeQueue::new());
        let device = Arc::new(Mutex::new(device));
        let counters = Arc::new(Counters {
            underruns: AtomicU64::new(0),
            late: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            dropped_no_metadata: AtomicU64::new(0),
            muting: AtomicBool::new(false),
            holdover: AtomicBool::new(false),
        });
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let queue = queue.clone();
            let device = device.clone();
            let counters = counters.clone();
            let running = running.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("sdrdevice".into())
                .spawn(move || {
                    if let Err(ret) = set_realtime_prio(1) {
                        logger.error(
                            "SDR",
                            format!("could not set realtime priority: {}", ret),
                        );
                    }
                    set_thread_name("sdrdevice");
                    let gpsdo = GpsdoMonitor::new(
                        config.refclk_loss_behaviour,
                        config.max_gps_holdover_time,
                    );
                    let mut worker = Worker {
                        config,
                        device,
                        counters,
                        logger,
                        gpsdo,
                        last_tx: None,
                        t_last_frame: None,
                    };
                    worker.run(&queue, &running);
                    running.store(false, Ordering::SeqCst);
                    // Release a producer blocked on a full queue.
                    queue.trigger_wakeup();
                })
                .expect("spawn SDR worker")
        };

        SdrOutput {
            name,
            config,
            queue,
            device,
            counters,
            running,
            worker: Some(worker),
            feedback,
        }
    }

    pub fn config(&self) -> &SdrConfig {
        &self.config
    }

    pub fn controllable(&self) -> Arc<SdrControl> {
        Arc::new(SdrControl {
            device: self.device.clone(),
            counters: self.counters.clone(),
        })
    }

    pub fn feedback(&self) -> Option<DpdFeedback> {
        self.feedback.clone()
    }

    pub fn late_count(&self) -> u64 {
        self.counters.late.load(Ordering::Relaxed)
    }

    pub fn frames_transmitted(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ModOutput for SdrOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, input: &Buffer, meta: &[FrameMetadata]) -> Result<usize> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DeviceError::Failed {
                reason: "SDR worker thread stopped".into(),
            }
            .into());
        }
        if input.is_empty() {
            // The modulator is still collecting ETI frames.
            return Ok(0);
        }
        let Some(first) = meta.first() else {
            self.counters
                .dropped_no_metadata
                .fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        };

        // The earliest contributing ETI frame times the whole
        // transmission frame.
        let frame = FrameData {
            buf: input.clone(),
            ts: first.ts,
        };

        if let Some(feedback) = &self.feedback {
            feedback.set_tx_frame(frame.buf.as_complex(), &frame.ts);
        }

        self.queue.push_wait_if_full(frame, FRAMES_MAX_SIZE);
        Ok(input.len())
    }
}

impl Drop for SdrOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.trigger_wakeup();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    config: SdrConfig,
    device: Arc<Mutex<Box<dyn SdrDevice>>>,
    counters: Arc<Counters>,
    logger: Logger,
    gpsdo: GpsdoMonitor,
    /// Timestamp of the last dispatched frame, for the expected
    /// next-frame check.
    last_tx: Option<(u32, u32)>,
    t_last_frame: Option<Instant>,
}

impl Worker {
    fn run(&mut self, queue: &ThreadsafeQueue<FrameData>, running: &AtomicBool) {
        let mut last_num_underruns = 0u64;
        let mut pop_prebuffering = 1usize;

        while running.load(Ordering::SeqCst) {
            let frame = match queue.wait_and_pop(pop_prebuffering) {
                Pop::Item(frame) => frame,
                Pop::Wakeup => break,
            };
            if !running.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.handle_frame(frame) {
                self.logger
                    .error("SDR", format!("output thread terminal error: {}", e));
                break;
            }

            let stats = self.device.lock().unwrap().get_run_statistics();
            // Refill the queue after every underrun to reduce the
            // likelihood of the next one.
            if stats.num_underruns > last_num_underruns {
                self.counters.underruns.store(stats.num_underruns, Ordering::Relaxed);
                pop_prebuffering = FRAMES_MAX_SIZE;
            } else {
                pop_prebuffering = 1;
            }
            last_num_underruns = stats.num_underruns;
        }
    }

    fn frame_duration(&self) -> Duration {
        let duration = OfdmParams::new(self.config.dab_mode)
            .map(|p| p.frame_duration())
            .unwrap_or(0.024);
        Duration::from_secs_f64(duration)
    }

    /// Skip the frame while keeping real-time pacing.
    fn sleep_through_frame(&mut self) {
        let now = Instant::now();
        let wait = self.frame_duration();
        let t_last = self.t_last_frame.get_or_insert(now);
        let elapsed = now.duration_since(*t_last);
        if wait > elapsed {
            std::thread::sleep(wait - elapsed);
        }
        *t_last += wait;
    }

    fn handle_frame(&mut self, mut frame: FrameData) -> Result<()> {
        let mut device = self.device.lock().unwrap();

        if self.config.max_gps_holdover_time > 0 {
            let verdict =
                self.gpsdo
                    .step(device.as_mut(), frame.ts.utc_seconds, Instant::now())?;
            self.counters
                .holdover
                .store(self.gpsdo.in_holdover(), Ordering::Relaxed);
            if verdict == ClockVerdict::Mute {
                drop(device);
                self.sleep_through_frame();
                return Ok(());
            }
        } else if !device.is_clk_source_ok() {
            drop(device);
            self.sleep_through_frame();
            return Ok(());
        }

        if self.config.enable_sync && self.config.mute_no_timestamps && !frame.ts.valid {
            drop(device);
            self.logger.info(
                "SDR",
                format!("muting frame FCT={}: no timestamp", frame.ts.fct),
            );
            self.sleep_through_frame();
            return Ok(());
        }

        if self.config.enable_sync && frame.ts.valid {
            let device_time = device.get_real_secs();

            if let Some((last_sec, last_pps)) = self.last_tx {
                let num_samples = (frame.buf.num_complex()) as u64;
                let increment =
                    num_samples * TICKS_PER_SECOND as u64 / self.config.sample_rate as u64;
                let mut expected_sec = last_sec.wrapping_add((increment / TICKS_PER_SECOND as u64) as u32);
                let mut expected_pps = last_pps as u64 + increment % TICKS_PER_SECOND as u64;
                while expected_pps >= TICKS_PER_SECOND as u64 {
                    expected_sec = expected_sec.wrapping_add(1);
                    expected_pps -= TICKS_PER_SECOND as u64;
                }
                if expected_sec != frame.ts.utc_seconds
                    || expected_pps as u32 != frame.ts.pps_ticks
                {
                    self.logger.warn(
                        "SDR",
                        format!(
                            "timestamp irregularity at FCT={}: expected {}+{} got {}+{}",
                            frame.ts.fct,
                            expected_sec,
                            expected_pps,
                            frame.ts.utc_seconds,
                            frame.ts.pps_ticks
                        ),
                    );
                    frame.ts.refresh = true;
                }
            }
            self.last_tx = Some((frame.ts.utc_seconds, frame.ts.pps_ticks));

            let offset = frame.ts.real_secs() - device_time;
            if offset < -TX_TIMEOUT {
                self.counters.late.fetch_add(1, Ordering::Relaxed);
                self.logger.warn(
                    "SDR",
                    format!(
                        "{}",
                        TimestampError::Late {
                            offset_secs: -offset
                        }
                    ),
                );
                return Ok(());
            }
            if offset > TIMESTAMP_ABORT_FUTURE {
                return Err(TimestampError::TooFarInFuture {
                    offset_secs: offset,
                }
                .into());
            }
        }

        if self.counters.muting.load(Ordering::Relaxed) {
            self.logger
                .info("SDR", format!("muting FCT={} requested", frame.ts.fct));
            return Ok(());
        }

        if frame.ts.refresh {
            device.require_timestamp_refresh();
        }
        device.transmit_frame(frame)?;
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Exports the `sdr.*` runtime parameters.
pub struct SdrControl {
    device: Arc<Mutex<Box<dyn SdrDevice>>>,
    counters: Arc<Counters>,
}

impl Controllable for SdrControl {
    fn rc_name(&self) -> &str {
        "sdr"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter { name: "txgain", description: "TX gain" },
            Parameter { name: "rxgain", description: "RX gain for DPD feedback" },
            Parameter { name: "bandwidth", description: "analog front-end bandwidth" },
            Parameter { name: "freq", description: "transmission frequency" },
            Parameter { name: "muting", description: "mute the output" },
            Parameter { name: "temp", description: "device temperature [C] (read-only)" },
            Parameter { name: "underruns", description: "underrun counter (read-only)" },
            Parameter { name: "latepackets", description: "late frame counter (read-only)" },
            Parameter { name: "frames", description: "transmitted frame counter (read-only)" },
            Parameter {
                name: "gpsdo_holdover",
                description: "1 while the GPSDO is in holdover (read-only)",
            },
        ]
    }

    fn get_parameter(&self, name: &str) -> std::result::Result<String, ParameterError> {
        match name {
            "txgain" => Ok(self.device.lock().unwrap().get_txgain().to_string()),
            "rxgain" => Ok(self.device.lock().unwrap().get_rxgain().to_string()),
            "bandwidth" => Ok(self.device.lock().unwrap().get_bandwidth().to_string()),
            "freq" => Ok(self.device.lock().unwrap().get_tx_freq().to_string()),
            "muting" => Ok((self.counters.muting.load(Ordering::Relaxed) as u8).to_string()),
            "temp" => self
                .device
                .lock()
                .unwrap()
                .get_temperature()
                .map(|t| t.to_string())
                .ok_or(ParameterError::NotAvailable),
            "underruns" => Ok(self.counters.underruns.load(Ordering::Relaxed).to_string()),
            "latepackets" => Ok(self.counters.late.load(Ordering::Relaxed).to_string()),
            "frames" => Ok(self.counters.frames.load(Ordering::Relaxed).to_string()),
            "gpsdo_holdover" => {
                Ok((self.counters.holdover.load(Ordering::Relaxed) as u8).to_string())
            }
            _ => Err(ParameterError::NotFound {
                controllable: "sdr".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> std::result::Result<(), ParameterError> {
        match name {
            "txgain" => {
                let gain = parse_value::<f64>("txgain", value)?;
                self.device.lock().unwrap().set_txgain(gain);
                Ok(())
            }
            "rxgain" => {
                let gain = parse_value::<f64>("rxgain", value)?;
                self.device.lock().unwrap().set_rxgain(gain);
                Ok(())
            }
            "bandwidth" => {
                let bw = parse_value::<f64>("bandwidth", value)?;
                self.device.lock().unwrap().set_bandwidth(bw);
                Ok(())
            }
            "freq" => {
                let freq = parse_value::<f64>("freq", value)?;
                self.device
                    .lock()
                    .unwrap()
                    .tune(0.0, freq)
                    .map_err(|e| ParameterError::InvalidValue {
                        name: "freq",
                        value: value.into(),
                        reason: e.to_string(),
                    })
            }
            "muting" => {
                let muting = parse_value::<u8>("muting", value)? != 0;
                self.counters.muting.store(muting, Ordering::Relaxed);
                Ok(())
            }
            "temp" => Err(ParameterError::ReadOnly("temp")),
            "underruns" => Err(ParameterError::ReadOnly("underruns")),
            "latepackets" => Err(ParameterError::ReadOnly("latepackets")),
            "frames" => Err(ParameterError::ReadOnly("frames")),
            "gpsdo_holdover" => Err(ParameterError::ReadOnly("gpsdo_holdover")),
            _ => Err(ParameterError::NotFound {
                controllable: "sdr".into(),
                name: name.into(),
            }),
        }
    }
}

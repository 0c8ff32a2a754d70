//! Frame timestamps and the MNSC/TIST decoder.
//!
//! Each ETI frame carries a 24-bit TIST (sub-second offset in units
//! of 1/16 384 000 s) and one 16-bit MNSC word. Four consecutive
//! MNSC words, indexed by framephase = FCT mod 4, reassemble one
//! BCD-packed UTC wall-clock time. A timestamp becomes valid only
//! after a complete four-frame sequence with type 0, identifier 0
//! and the sync_to_frame flag set.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::controllable::{parse_value, Controllable, Parameter};
use crate::errors::ParameterError;

/// TIST/PPS tick rate: 16.384 MHz.
pub const TICKS_PER_SECOND: u32 = 16_384_000;

/// Transmission timestamp attached to every frame flowing through
/// the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimestamp {
    /// Unix-epoch seconds.
    pub utc_seconds: u32,
    /// Sub-second offset in 1/16 384 000 s, in [0, 16 384 000).
    pub pps_ticks: u32,
    /// False until a complete MNSC time has been received.
    pub valid: bool,
    /// Set on discontinuities; tells the SDR stage to re-establish
    /// hardware time alignment at the next handover.
    pub refresh: bool,
    /// Originating ETI frame count.
    pub fct: u8,
    /// Framephase (FCT mod 4) of the originating frame.
    pub fp: u8,
}

impl FrameTimestamp {
    pub fn zero() -> Self {
        FrameTimestamp {
            utc_seconds: 0,
            pps_ticks: 0,
            valid: false,
            refresh: false,
            fct: 0,
            fp: 0,
        }
    }

    pub fn real_secs(&self) -> f64 {
        self.utc_seconds as f64 + self.pps_ticks as f64 / TICKS_PER_SECOND as f64
    }

    /// Add a real number of seconds, carrying between the fields.
    pub fn add_seconds(&mut self, diff: f64) {
        let secs = diff.trunc();
        let frac = diff - secs;
        self.utc_seconds = self.utc_seconds.wrapping_add(secs as i64 as u32);
        let mut pps = self.pps_ticks as i64 + (frac * TICKS_PER_SECOND as f64).round() as i64;
        while pps < 0 {
            self.utc_seconds = self.utc_seconds.wrapping_sub(1);
            pps += TICKS_PER_SECOND as i64;
        }
        while pps >= TICKS_PER_SECOND as i64 {
            self.utc_seconds = self.utc_seconds.wrapping_add(1);
            pps -= TICKS_PER_SECOND as i64;
        }
        self.pps_ticks = pps as u32;
    }

    /// Lexicographic comparison on (seconds, ticks); validity flags
    /// do not participate.
    pub fn cmp_time(&self, other: &FrameTimestamp) -> std::cmp::Ordering {
        (self.utc_seconds, self.pps_ticks).cmp(&(other.utc_seconds, other.pps_ticks))
    }
}

impl std::ops::Add<f64> for FrameTimestamp {
    type Output = FrameTimestamp;

    fn add(mut self, diff: f64) -> FrameTimestamp {
        self.add_seconds(diff);
        self
    }
}

/// Accumulated wall-clock pieces from the four MNSC words.
#[derive(Debug, Default, Clone, Copy)]
struct MnscTime {
    second: u32,
    minute: u32,
    hour: u32,
    day: u32,
    month: u32,
    year: u32, // two digits, 20xx
}

impl MnscTime {
    fn to_unix(self) -> Option<u32> {
        let date = NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month, self.day)?;
        let dt = date.and_hms_opt(self.hour, self.minute, self.second)?;
        u32::try_from(dt.and_utc().timestamp()).ok()
    }
}

/// Decodes the time information carried in ETI (MNSC + TIST) or
/// supplied directly by EDI, and applies the configurable offset.
pub struct TimestampDecoder {
    time_secs: u32,
    time_pps: u32,
    latest_fct: u8,
    latest_fp: u8,
    temp_time: MnscTime,
    enable_decode: bool,
    full_timestamp_received: bool,
    /// Suppresses MNSC seconds updates right after a PPS wrap, to
    /// avoid a double increment.
    inhibit_second_update: u8,
    offset: f64,
    offset_changed: bool,
    time_secs_of_frame0: u32,
    time_pps_of_frame0: u32,
}

impl TimestampDecoder {
    pub fn new(offset: f64) -> Self {
        TimestampDecoder {
            time_secs: 0,
            time_pps: 0,
            latest_fct: 0,
            latest_fp: 0,
            temp_time: MnscTime::default(),
            enable_decode: false,
            full_timestamp_received: false,
            inhibit_second_update: 0,
            offset,
            offset_changed: false,
            time_secs_of_frame0: 0,
            time_pps_of_frame0: 0,
        }
    }

    /// The timestamp for the current frame, offset applied. Reading
    /// it consumes a pending offset-change into the refresh flag.
    pub fn timestamp(&mut self) -> FrameTimestamp {
        let mut ts = FrameTimestamp {
            utc_seconds: self.time_secs,
            pps_ticks: self.time_pps,
            valid: self.full_timestamp_received,
            refresh: self.offset_changed,
            fct: self.latest_fct,
            fp: self.latest_fp,
        };
        self.offset_changed = false;
        ts.add_seconds(self.offset);
        ts
    }

    /// Update from one ETI frame.
    pub fn update_eti(&mut self, framephase: u8, mnsc: u16, pps_ticks: u32, fct: u8) {
        self.update_pps(pps_ticks);
        self.push_mnsc(framephase & 0x3, mnsc);
        self.latest_fct = fct;
        self.latest_fp = framephase & 0x3;

        if self.full_timestamp_received && fct == 0 {
            self.time_secs_of_frame0 = self.time_secs;
            self.time_pps_of_frame0 = self.time_pps;
        }
    }

    /// Update from an EDI frame; seconds come directly from the
    /// header, the MNSC path is bypassed.
    pub fn update_edi(&mut self, seconds_utc: u32, pps_ticks: u32, fct: u8, framephase: u8) {
        self.time_secs = seconds_utc;
        self.time_pps = pps_ticks;
        self.latest_fct = fct;
        self.latest_fp = framephase & 0x3;
        self.full_timestamp_received = true;

        if fct == 0 {
            self.time_secs_of_frame0 = self.time_secs;
            self.time_pps_of_frame0 = self.time_pps;
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Change the offset; the next emitted timestamp carries
    /// refresh=true so the output resynchronises.
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
        self.offset_changed = true;
    }

    pub fn timestamp_valid(&self) -> bool {
        self.full_timestamp_received
    }

    pub fn latest_fct(&self) -> u8 {
        self.latest_fct
    }

    pub fn frame0_real_secs(&self) -> f64 {
        self.time_secs_of_frame0 as f64
            + self.time_pps_of_frame0 as f64 / TICKS_PER_SECOND as f64
    }

    pub fn real_secs(&self) -> f64 {
        self.time_secs as f64 + self.time_pps as f64 / TICKS_PER_SECOND as f64
    }

    fn update_pps(&mut self, pps: u32) {
        if self.time_pps > pps {
            // Second boundary crossed; the MNSC will report the new
            // second only at the end of its four-frame sequence.
            self.inhibit_second_update = 2;
            self.time_secs = self.time_secs.wrapping_add(1);
        }
        self.time_pps = pps;
    }

    fn push_mnsc(&mut self, framephase: u8, mnsc: u16) {
        match framephase {
            0 => {
                let ty = mnsc & 0xF;
                let identifier = (mnsc >> 4) & 0xF;
                self.enable_decode = ty == 0 && identifier == 0;
                self.temp_time = MnscTime::default();
            }
            1 => {
                self.temp_time.second =
                    (((mnsc >> 4) & 0x7) * 10 + (mnsc & 0xF)) as u32;
                self.temp_time.minute =
                    (((mnsc >> 12) & 0x7) * 10 + ((mnsc >> 8) & 0xF)) as u32;
                let sync_to_frame = mnsc & 0x8000 != 0;
                if !sync_to_frame {
                    self.enable_decode = false;
                }
            }
            2 => {
                self.temp_time.hour = (((mnsc >> 4) & 0xF) * 10 + (mnsc & 0xF)) as u32;
                self.temp_time.day =
                    (((mnsc >> 12) & 0xF) * 10 + ((mnsc >> 8) & 0xF)) as u32;
            }
            3 => {
                self.temp_time.month = (((mnsc >> 4) & 0xF) * 10 + (mnsc & 0xF)) as u32;
                self.temp_time.year =
                    (((mnsc >> 12) & 0xF) * 10 + ((mnsc >> 8) & 0xF)) as u32;
                if self.enable_decode {
                    match self.temp_time.to_unix() {
                        Some(secs) => self.update_seconds(secs),
                        None => self.enable_decode = false,
                    }
                }
            }
            _ => unreachable!("framephase is masked to two bits"),
        }
    }

    fn update_seconds(&mut self, secs: u32) {
        if self.inhibit_second_update > 0 {
            self.inhibit_second_update -= 1;
        } else {
            self.time_secs = secs;
            self.full_timestamp_received = true;
        }
    }
}

/// Exports `tist.offset`, `tist.timestamp` and `tist.timestamp0`.
pub struct TistControl {
    decoder: Arc<Mutex<TimestampDecoder>>,
}

impl TistControl {
    pub fn new(decoder: Arc<Mutex<TimestampDecoder>>) -> Self {
        TistControl { decoder }
    }
}

impl Controllable for TistControl {
    fn rc_name(&self) -> &str {
        "tist"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter {
                name: "offset",
                description: "TIST offset [s]",
            },
            Parameter {
                name: "timestamp",
                description: "FCT and timestamp [s] (read-only)",
            },
            Parameter {
                name: "timestamp0",
                description: "Timestamp of frame with FCT=0 [s] (read-only)",
            },
        ]
    }

    fn get_parameter(&self, name: &str) -> Result<String, ParameterError> {
        let decoder = self.decoder.lock().unwrap();
        match name {
            "offset" => Ok(decoder.offset().to_string()),
            "timestamp" => {
                if decoder.timestamp_valid() {
                    Ok(format!(
                        "{:.9} for frame FCT {}",
                        decoder.real_secs(),
                        decoder.latest_fct()
                    ))
                } else {
                    Err(ParameterError::NotAvailable)
                }
            }
            "timestamp0" => {
                if decoder.timestamp_valid() {
                    Ok(format!("{:.9} for frame FCT 0", decoder.frame0_real_secs()))
                } else {
                    Err(ParameterError::NotAvailable)
                }
            }
            _ => Err(ParameterError::NotFound {
                controllable: "tist".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), ParameterError> {
        match name {
            "offset" => {
                let offset = parse_value::<f64>("offset", value)?;
                self.decoder.lock().unwrap().set_offset(offset);
                Ok(())
            }
            "timestamp" => Err(ParameterError::ReadOnly("timestamp")),
            "timestamp0" => Err(ParameterError::ReadOnly("timestamp0")),
            _ => Err(ParameterError::NotFound {
                controllable: "tist".into(),
                name: name.into(),
            }),
        }
    }
}

/// Encode a wall-clock time into the four MNSC words, framephase
/// 0..3. The inverse of the decoder; used by the EDI frame
/// synthesiser and by tests.
pub fn encode_mnsc(
    year2: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> [u16; 4] {
    let bcd = |v: u32| -> u16 { (((v / 10) << 4) | (v % 10)) as u16 };
    [
        0x0000, // type 0, identifier 0
        0x8000 | (bcd(minute) << 8) | bcd(second),
        (bcd(day) << 8) | bcd(hour),
        (bcd(year2) << 8) | bcd(month),
    ]
}

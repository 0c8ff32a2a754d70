//! Digital gain control.
//!
//! One gain value is computed per transmission frame and applied to
//! every sample:
//!
//! - fix: 512 · digital_gain
//! - max: digital_gain · 32767 / max(|re|, |im|)
//! - var: digital_gain · 32767 / (k · σ), σ from a Welford pass per
//!   component, merged by averaging
//!
//! `gain.digital`, `gain.mode` and `gain.var` are runtime
//! controllable.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use atomic_float::AtomicF32;
use num_complex::Complex32;

use crate::controllable::{parse_value, Controllable, Parameter};
use crate::errors::ParameterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    Fix,
    Max,
    Var,
}

impl FromStr for GainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fix" => Ok(GainMode::Fix),
            "max" => Ok(GainMode::Max),
            "var" => Ok(GainMode::Var),
            other => Err(format!("unknown gain mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for GainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GainMode::Fix => "fix",
            GainMode::Max => "max",
            GainMode::Var => "var",
        };
        write!(f, "{}", s)
    }
}

const FULL_SCALE: f32 = 32767.0;

pub struct GainControl {
    mode: Arc<Mutex<GainMode>>,
    digital_gain: Arc<AtomicF32>,
    variance_factor: Arc<AtomicF32>,
}

impl GainControl {
    pub fn new(mode: GainMode, digital_gain: f32, variance_factor: f32) -> Self {
        GainControl {
            mode: Arc::new(Mutex::new(mode)),
            digital_gain: Arc::new(AtomicF32::new(digital_gain)),
            variance_factor: Arc::new(AtomicF32::new(variance_factor)),
        }
    }

    /// Compute the frame gain and apply it in place.
    pub fn process(&self, samples: &mut [Complex32]) -> f32 {
        let mode = *self.mode.lock().unwrap();
        let digital_gain = self.digital_gain.load(Ordering::Relaxed);
        let gain = match mode {
            GainMode::Fix => 512.0 * digital_gain,
            GainMode::Max => digital_gain * Self::gain_max(samples),
            GainMode::Var => {
                digital_gain
                    * Self::gain_var(samples, self.variance_factor.load(Ordering::Relaxed))
            }
        };
        for s in samples.iter_mut() {
            *s *= gain;
        }
        gain
    }

    fn gain_max(samples: &[Complex32]) -> f32 {
        let peak = samples
            .iter()
            .map(|s| s.re.abs().max(s.im.abs()))
            .fold(0.0f32, f32::max);
        if peak > 0.0 {
            FULL_SCALE / peak
        } else {
            1.0
        }
    }

    fn gain_var(samples: &[Complex32], factor: f32) -> f32 {
        if samples.is_empty() {
            return 1.0;
        }
        // Welford running update, I and Q treated separately.
        let mut mean = Complex32::new(0.0, 0.0);
        let mut m2 = Complex32::new(0.0, 0.0);
        for (i, s) in samples.iter().enumerate() {
            let delta = *s - mean;
            mean += delta / (i + 1) as f32;
            let delta2 = *s - mean;
            m2 += Complex32::new(delta.re * delta2.re, delta.im * delta2.im);
        }
        let n = samples.len() as f32;
        let sigma = ((m2.re / n + m2.im / n) / 2.0).sqrt();
        if sigma > f32::EPSILON {
            FULL_SCALE / (factor * sigma)
        } else {
            1.0
        }
    }

    pub fn controllable(&self) -> Arc<GainControlParams> {
        Arc::new(GainControlParams {
            mode: self.mode.clone(),
            digital_gain: self.digital_gain.clone(),
            variance_factor: self.variance_factor.clone(),
        })
    }
}

/// Exports `gain.digital`, `gain.mode`, `gain.var`.
pub struct GainControlParams {
    mode: Arc<Mutex<GainMode>>,
    digital_gain: Arc<AtomicF32>,
    variance_factor: Arc<AtomicF32>,
}

impl Controllable for GainControlParams {
    fn rc_name(&self) -> &str {
        "gain"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter { name: "digital", description: "digital gain factor" },
            Parameter { name: "mode", description: "gain computation mode: fix, max or var" },
            Parameter { name: "var", description: "variance normalisation factor" },
        ]
    }

    fn get_parameter(&self, name: &str) -> Result<String, ParameterError> {
        match name {
            "digital" => Ok(self.digital_gain.load(Ordering::Relaxed).to_string()),
            "mode" => Ok(self.mode.lock().unwrap().to_string()),
            "var" => Ok(self.variance_factor.load(Ordering::Relaxed).to_string()),
            _ => Err(ParameterError::NotFound {
                controllable: "gain".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), ParameterError> {
        match name {
            "digital" => {
                self.digital_gain
                    .store(parse_value::<f32>("digital", value)?, Ordering::Relaxed);
                Ok(())
            }
            "mode" => {
                let mode = value
                    .parse::<GainMode>()
                    .map_err(|reason| ParameterError::InvalidValue {
                        name: "mode",
                        value: value.into(),
                        reason,
                    })?;
                *self.mode.lock().unwrap() = mode;
                Ok(())
            }
            "var" => {
                self.variance_factor
                    .store(parse_value::<f32>("var", value)?, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(ParameterError::NotFound {
                controllable: "gain".into(),
                name: name.into(),
            }),
        }
    }
}

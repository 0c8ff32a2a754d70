//! Transmitter Identification Information.
//!
//! The TII symbol activates 32 carriers, arranged in adjacent pairs
//! {k, k+1} selected by (comb, pattern) per EN 300 401 clause 14.8,
//! and is inserted in place of the null symbol in one transmission
//! frame out of every four, aligned with FP = 0. The amplitude ratio
//! of 16 dB versus data symbols arises from activating only 32 of
//! the carriers; nothing is rescaled here.
//!
//! Two variants exist: the standards-correct one where both
//! carriers of a pair transmit the phasor of carrier k, and a legacy
//! one (for old, buggy receivers) where carrier k+1 transmits its
//! own phasor.

use std::sync::{Arc, Mutex};

use num_complex::Complex32;

use crate::controllable::{parse_value, Controllable, Parameter};
use crate::errors::{ConfigError, ParameterError, Result};
use crate::ofdm::params::OfdmParams;
use crate::ofdm::phase_ref::carrier_index;

/// One row per pattern number 0..=69; the eight entries say which
/// carrier groups b carry a pair.
#[rustfmt::skip]
const PATTERNS: [[u8; 8]; 70] = [
    [0,0,0,0,1,1,1,1], [0,0,0,1,0,1,1,1], [0,0,0,1,1,0,1,1], [0,0,0,1,1,1,0,1],
    [0,0,0,1,1,1,1,0], [0,0,1,0,0,1,1,1], [0,0,1,0,1,0,1,1], [0,0,1,0,1,1,0,1],
    [0,0,1,0,1,1,1,0], [0,0,1,1,0,0,1,1], [0,0,1,1,0,1,0,1], [0,0,1,1,0,1,1,0],
    [0,0,1,1,1,0,0,1], [0,0,1,1,1,0,1,0], [0,0,1,1,1,1,0,0], [0,1,0,0,0,1,1,1],
    [0,1,0,0,1,0,1,1], [0,1,0,0,1,1,0,1], [0,1,0,0,1,1,1,0], [0,1,0,1,0,0,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,0,1,1,0], [0,1,0,1,1,0,0,1], [0,1,0,1,1,0,1,0],
    [0,1,0,1,1,1,0,0], [0,1,1,0,0,0,1,1], [0,1,1,0,0,1,0,1], [0,1,1,0,0,1,1,0],
    [0,1,1,0,1,0,0,1], [0,1,1,0,1,0,1,0], [0,1,1,0,1,1,0,0], [0,1,1,1,0,0,0,1],
    [0,1,1,1,0,0,1,0], [0,1,1,1,0,1,0,0], [0,1,1,1,1,0,0,0], [1,0,0,0,0,1,1,1],
    [1,0,0,0,1,0,1,1], [1,0,0,0,1,1,0,1], [1,0,0,0,1,1,1,0], [1,0,0,1,0,0,1,1],
    [1,0,0,1,0,1,0,1], [1,0,0,1,0,1,1,0], [1,0,0,1,1,0,0,1], [1,0,0,1,1,0,1,0],
    [1,0,0,1,1,1,0,0], [1,0,1,0,0,0,1,1], [1,0,1,0,0,1,0,1], [1,0,1,0,0,1,1,0],
    [1,0,1,0,1,0,0,1], [1,0,1,0,1,0,1,0], [1,0,1,0,1,1,0,0], [1,0,1,1,0,0,0,1],
    [1,0,1,1,0,0,1,0], [1,0,1,1,0,1,0,0], [1,0,1,1,1,0,0,0], [1,1,0,0,0,0,1,1],
    [1,1,0,0,0,1,0,1], [1,1,0,0,0,1,1,0], [1,1,0,0,1,0,0,1], [1,1,0,0,1,0,1,0],
    [1,1,0,0,1,1,0,0], [1,1,0,1,0,0,0,1], [1,1,0,1,0,0,1,0], [1,1,0,1,0,1,0,0],
    [1,1,0,1,1,0,0,0], [1,1,1,0,0,0,0,1], [1,1,1,0,0,0,1,0], [1,1,1,0,0,1,0,0],
    [1,1,1,0,1,0,0,0], [1,1,1,1,0,0,0,0],
];

#[derive(Debug, Clone, Copy)]
pub struct TiiConfig {
    pub enable: bool,
    /// Comb number, 0..=23.
    pub comb: u8,
    /// Pattern number, 0..=69.
    pub pattern: u8,
    /// Legacy variant for old receivers; non-conformant.
    pub old_variant: bool,
}

impl Default for TiiConfig {
    fn default() -> Self {
        TiiConfig {
            enable: false,
            comb: 0,
            pattern: 0,
            old_variant: false,
        }
    }
}

struct TiiState {
    conf: TiiConfig,
    /// A_{c,p}(k) per carrier position, ascending frequency.
    enabled_carriers: Vec<bool>,
}

impl TiiState {
    fn prepare_pattern(&mut self, mode: u8, carriers: usize) {
        let comb = self.conf.comb as i32;
        let pattern = PATTERNS[self.conf.pattern as usize];
        for c in self.enabled_carriers.iter_mut() {
            *c = false;
        }
        let mut enable = |k: i32| {
            self.enabled_carriers[carrier_index(k, carriers)] = true;
        };
        match mode {
            1 => {
                // Clause 14.8 for TM I: the selected groups repeat
                // in each quarter of the band.
                for b in 0i32..8 {
                    if pattern[b as usize] == 1 {
                        enable(-768 + 2 * comb + 48 * b);
                        enable(-384 + 2 * comb + 48 * b);
                        enable(1 + 2 * comb + 48 * b);
                        enable(385 + 2 * comb + 48 * b);
                    }
                }
            }
            2 => {
                for b in 0i32..4 {
                    if pattern[b as usize] == 1 {
                        enable(-192 + 2 * comb + 48 * b);
                    }
                }
                for b in 4i32..8 {
                    if pattern[b as usize] == 1 {
                        enable(-191 + 2 * comb + 48 * b);
                    }
                }
            }
            _ => unreachable!("pattern preparation is gated on the mode"),
        }
    }
}

/// Generates the null-symbol carriers: zeros, or the TII pattern on
/// the frame it applies to.
pub struct Tii {
    mode: u8,
    carriers: usize,
    state: Arc<Mutex<TiiState>>,
}

impl Tii {
    pub fn new(params: &OfdmParams, conf: TiiConfig) -> Result<Self> {
        if conf.comb > 23 {
            return Err(ConfigError::InvalidTii {
                reason: format!("comb {} not in 0..=23", conf.comb),
            }
            .into());
        }
        if conf.pattern > 69 {
            return Err(ConfigError::InvalidTii {
                reason: format!("pattern {} not in 0..=69", conf.pattern),
            }
            .into());
        }
        if conf.enable && !matches!(params.mode, 1 | 2) {
            return Err(ConfigError::InvalidTii {
                reason: format!("TII not available in transmission mode {}", params.mode),
            }
            .into());
        }
        let mut state = TiiState {
            conf,
            enabled_carriers: vec![false; params.carriers],
        };
        if matches!(params.mode, 1 | 2) {
            state.prepare_pattern(params.mode, params.carriers);
        }
        Ok(Tii {
            mode: params.mode,
            carriers: params.carriers,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Fill one null symbol's carriers. `phase_ref` supplies the
    /// phasors; `insert` is true on the one-in-four frame.
    pub fn process(&self, out: &mut [Complex32], phase_ref: &[Complex32], insert: bool) {
        debug_assert_eq!(out.len(), self.carriers);
        for c in out.iter_mut() {
            *c = Complex32::new(0.0, 0.0);
        }
        let state = self.state.lock().unwrap();
        if !(state.conf.enable && insert) {
            return;
        }
        let old_variant = state.conf.old_variant;
        for i in 0..self.carriers - 1 {
            // A(k) and A(k+1) are never both set, so the pairs do
            // not overlap.
            if state.enabled_carriers[i] {
                out[i] = phase_ref[i];
                out[i + 1] = if old_variant {
                    phase_ref[i + 1]
                } else {
                    phase_ref[i]
                };
            }
        }
    }

    pub fn controllable(&self) -> Arc<TiiControl> {
        Arc::new(TiiControl {
            mode: self.mode,
            carriers: self.carriers,
            state: self.state.clone(),
        })
    }
}

/// Exports `tii.enable`, `tii.comb`, `tii.pattern`,
/// `tii.old_variant`.
pub struct TiiControl {
    mode: u8,
    carriers: usize,
    state: Arc<Mutex<TiiState>>,
}

impl Controllable for TiiControl {
    fn rc_name(&self) -> &str {
        "tii"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter { name: "enable", description: "enable TII [0-1]" },
            Parameter { name: "comb", description: "TII comb number [0-23]" },
            Parameter { name: "pattern", description: "TII pattern number [0-69]" },
            Parameter {
                name: "old_variant",
                description: "select old TII variant for old (buggy) receivers [0-1]",
            },
        ]
    }

    fn get_parameter(&self, name: &str) -> std::result::Result<String, ParameterError> {
        let state = self.state.lock().unwrap();
        match name {
            "enable" => Ok((state.conf.enable as u8).to_string()),
            "comb" => Ok(state.conf.comb.to_string()),
            "pattern" => Ok(state.conf.pattern.to_string()),
            "old_variant" => Ok((state.conf.old_variant as u8).to_string()),
            _ => Err(ParameterError::NotFound {
                controllable: "tii".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> std::result::Result<(), ParameterError> {
        let mut state = self.state.lock().unwrap();
        match name {
            "enable" => {
                let enable = parse_value::<u8>("enable", value)? != 0;
                if enable && !matches!(self.mode, 1 | 2) {
                    return Err(ParameterError::InvalidValue {
                        name: "enable",
                        value: value.into(),
                        reason: format!("TII not available in mode {}", self.mode),
                    });
                }
                state.conf.enable = enable;
                Ok(())
            }
            "comb" => {
                let comb = parse_value::<u8>("comb", value)?;
                if comb > 23 {
                    return Err(ParameterError::InvalidValue {
                        name: "comb",
                        value: value.into(),
                        reason: "must be 0..=23".into(),
                    });
                }
                state.conf.comb = comb;
                if matches!(self.mode, 1 | 2) {
                    state.prepare_pattern(self.mode, self.carriers);
                }
                Ok(())
            }
            "pattern" => {
                let pattern = parse_value::<u8>("pattern", value)?;
                if pattern > 69 {
                    return Err(ParameterError::InvalidValue {
                        name: "pattern",
                        value: value.into(),
                        reason: "must be 0..=69".into(),
                    });
                }
                state.conf.pattern = pattern;
                if matches!(self.mode, 1 | 2) {
                    state.prepare_pattern(self.mode, self.carriers);
                }
                Ok(())
            }
            "old_variant" => {
                state.conf.old_variant = parse_value::<u8>("old_variant", value)? != 0;
                Ok(())
            }
            _ => Err(ParameterError::NotFound {
                controllable: "tii".into(),
                name: name.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofdm::phase_ref::PhaseReference;

    #[test]
    fn test_every_pattern_has_four_groups() {
        for (p, pattern) in PATTERNS.iter().enumerate() {
            assert_eq!(pattern.iter().map(|&b| b as usize).sum::<usize>(), 4, "pattern {}", p);
        }
    }

    #[test]
    fn test_patterns_ascend_and_are_unique() {
        let as_number = |p: &[u8; 8]| p.iter().fold(0u8, |acc, &b| (acc << 1) | b);
        for pair in PATTERNS.windows(2) {
            assert!(as_number(&pair[0]) < as_number(&pair[1]));
        }
    }

    #[test]
    fn test_mode1_comb0_pattern0_carriers() {
        let params = OfdmParams::new(1).unwrap();
        let conf = TiiConfig { enable: true, ..Default::default() };
        let tii = Tii::new(&params, conf).unwrap();
        let prs = PhaseReference::new(&params);

        let mut out = vec![Complex32::new(0.0, 0.0); params.carriers];
        tii.process(&mut out, prs.symbol(), true);

        let active: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, c)| c.norm() > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(active.len(), 32);
        // Pattern 0 enables groups 4..=7; the first pair in each
        // quarter sits at k = base + 48·4.
        let expected_first = carrier_index(-768 + 48 * 4, 1536);
        assert_eq!(active[0], expected_first);
        assert_eq!(active[1], expected_first + 1);
    }

    #[test]
    fn test_not_inserted_outside_tii_frame() {
        let params = OfdmParams::new(1).unwrap();
        let conf = TiiConfig { enable: true, ..Default::default() };
        let tii = Tii::new(&params, conf).unwrap();
        let prs = PhaseReference::new(&params);
        let mut out = vec![Complex32::new(1.0, 1.0); params.carriers];
        tii.process(&mut out, prs.symbol(), false);
        assert!(out.iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn test_old_variant_differs() {
        let params = OfdmParams::new(1).unwrap();
        let tii = Tii::new(&params, TiiConfig { enable: true, ..Default::default() }).unwrap();
        let prs = PhaseReference::new(&params);

        let mut new_variant = vec![Complex32::new(0.0, 0.0); params.carriers];
        tii.process(&mut new_variant, prs.symbol(), true);

        tii.controllable().set_parameter("old_variant", "1").unwrap();
        let mut old_variant = vec![Complex32::new(0.0, 0.0); params.carriers];
        tii.process(&mut old_variant, prs.symbol(), true);

        assert_ne!(new_variant, old_variant);
        // In the new variant each pair repeats one phasor.
        let first = new_variant.iter().position(|c| c.norm() > 0.0).unwrap();
        assert_eq!(new_variant[first], new_variant[first + 1]);
    }

    #[test]
    fn test_mode3_cannot_enable() {
        let params = OfdmParams::new(3).unwrap();
        assert!(Tii::new(&params, TiiConfig { enable: true, ..Default::default() }).is_err());
        let tii = Tii::new(&params, TiiConfig::default()).unwrap();
        assert!(tii.controllable().set_parameter("enable", "1").is_err());
    }
}

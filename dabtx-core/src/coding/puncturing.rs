//! Puncturing vectors and protection profiles.
//!
//! The mother-code output is punctured in blocks of 128 bits; each
//! block uses one of the vectors PI_1..PI_24, a 32-bit pattern
//! applied four times per block. PI_p keeps 8 + p of every 32 bits.
//! The 24 tail bits use a fixed vector keeping 12 bits.
//!
//! Which vectors apply to which part of a sub-channel is the
//! protection profile, selected through the ETI TPL field: the short
//! form is an index into the 64-entry UEP table, the long form
//! carries the EEP option and level.

use crate::errors::{EtiError, Result};

/// Group upgrade order used to enumerate PI_1..PI_24.
const UPGRADE_ORDER: [usize; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

/// The 32-bit puncturing vector for index `pi` in 1..=24, one byte
/// per bit.
pub fn pi_pattern(pi: usize) -> [u8; 32] {
    assert!((1..=24).contains(&pi), "PI index out of range");
    // Every group keeps its leading bit; each step of the upgrade
    // order keeps one more bit in its group.
    let mut kept = [1usize; 8];
    for step in 0..pi {
        kept[UPGRADE_ORDER[step % 8]] += 1;
    }
    let mut pattern = [0u8; 32];
    for (group, &k) in kept.iter().enumerate() {
        for bit in 0..k {
            pattern[group * 4 + bit] = 1;
        }
    }
    pattern
}

/// Tail puncturing vector over the 24 tail bits; keeps 12.
pub const TAIL_PATTERN: [u8; 24] = [
    1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0,
];

/// `blocks` 128-bit blocks punctured with vector PI_`pi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuncturingRule {
    pub blocks: usize,
    pub pi: usize,
}

impl PuncturingRule {
    pub fn kept_bits(&self) -> usize {
        self.blocks * 4 * (8 + self.pi)
    }
}

/// Complete puncturing recipe for one coded lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionProfile {
    pub rules: Vec<PuncturingRule>,
    pub bitrate_kbps: u32,
}

impl ProtectionProfile {
    /// Mother-code bits consumed: rule blocks plus the tail.
    pub fn mother_bits(&self) -> usize {
        self.rules.iter().map(|r| r.blocks * 128).sum::<usize>() + 24
    }

    /// Bits surviving puncturing, tail included.
    pub fn punctured_bits(&self) -> usize {
        self.rules.iter().map(|r| r.kept_bits()).sum::<usize>() + 12
    }

    /// Zero bits appended to reach the next capacity-unit boundary.
    pub fn padding_bits(&self) -> usize {
        (64 - self.punctured_bits() % 64) % 64
    }

    /// Occupied capacity units in the CIF.
    pub fn capacity_units(&self) -> usize {
        (self.punctured_bits() + self.padding_bits()) / 64
    }
}

/// Apply a profile to the mother-code output.
pub fn puncture(mother: &[u8], profile: &ProtectionProfile) -> Vec<u8> {
    debug_assert_eq!(mother.len(), profile.mother_bits());
    let mut out = Vec::with_capacity(profile.punctured_bits());
    let mut pos = 0;
    for rule in &profile.rules {
        let pattern = pi_pattern(rule.pi);
        for _ in 0..rule.blocks * 4 {
            for (bit, keep) in mother[pos..pos + 32].iter().zip(pattern.iter()) {
                if *keep == 1 {
                    out.push(*bit);
                }
            }
            pos += 32;
        }
    }
    for (bit, keep) in mother[pos..pos + 24].iter().zip(TAIL_PATTERN.iter()) {
        if *keep == 1 {
            out.push(*bit);
        }
    }
    out
}

/// UEP table (EN 300 401 short-form profiles), in ETI TPL index
/// order: bitrate ascending, protection level 5 down to 1. Each
/// entry: (bitrate kbit/s, protection level, [L1..L4], [PI1..PI4]).
/// A zero block count makes the corresponding rule empty.
#[rustfmt::skip]
const UEP_TABLE: [(u32, u8, [usize; 4], [usize; 4]); 64] = [
    (32,  5, [3, 4, 17, 0],    [5, 3, 2, 0]),
    (32,  4, [3, 3, 18, 0],    [11, 6, 5, 0]),
    (32,  3, [3, 4, 14, 3],    [15, 9, 6, 8]),
    (32,  2, [3, 4, 14, 3],    [22, 13, 8, 13]),
    (32,  1, [3, 5, 13, 3],    [24, 17, 12, 17]),
    (48,  5, [4, 3, 26, 3],    [5, 4, 2, 3]),
    (48,  4, [3, 4, 26, 3],    [9, 6, 4, 6]),
    (48,  3, [3, 4, 26, 3],    [15, 10, 6, 9]),
    (48,  2, [3, 4, 26, 3],    [24, 14, 8, 15]),
    (48,  1, [3, 5, 25, 3],    [24, 18, 13, 18]),
    (56,  5, [6, 10, 23, 3],   [5, 4, 2, 3]),
    (56,  4, [6, 10, 23, 3],   [9, 6, 4, 5]),
    (56,  3, [6, 12, 21, 3],   [16, 7, 6, 9]),
    (56,  2, [6, 10, 23, 3],   [23, 13, 8, 13]),
    (64,  5, [6, 9, 31, 2],    [5, 3, 2, 3]),
    (64,  4, [6, 9, 33, 0],    [11, 6, 5, 0]),
    (64,  3, [6, 12, 27, 3],   [16, 8, 6, 9]),
    (64,  2, [6, 10, 29, 3],   [23, 13, 8, 13]),
    (64,  1, [6, 11, 28, 3],   [24, 18, 12, 18]),
    (80,  5, [6, 10, 41, 3],   [6, 3, 2, 3]),
    (80,  4, [6, 10, 41, 3],   [11, 6, 5, 6]),
    (80,  3, [6, 11, 40, 3],   [16, 8, 6, 7]),
    (80,  2, [6, 10, 41, 3],   [23, 13, 8, 13]),
    (80,  1, [6, 10, 41, 3],   [24, 17, 12, 18]),
    (96,  5, [7, 9, 53, 3],    [5, 4, 2, 4]),
    (96,  4, [7, 10, 52, 3],   [9, 6, 4, 6]),
    (96,  3, [6, 12, 51, 3],   [16, 9, 6, 10]),
    (96,  2, [6, 10, 53, 3],   [22, 12, 9, 12]),
    (96,  1, [6, 13, 50, 3],   [24, 18, 13, 19]),
    (112, 5, [14, 17, 50, 3],  [5, 4, 2, 5]),
    (112, 4, [11, 21, 49, 3],  [9, 6, 4, 8]),
    (112, 3, [11, 23, 47, 3],  [16, 8, 6, 9]),
    (112, 2, [11, 21, 49, 3],  [23, 12, 9, 14]),
    (128, 5, [12, 19, 62, 3],  [5, 3, 2, 4]),
    (128, 4, [11, 21, 61, 3],  [11, 6, 5, 7]),
    (128, 3, [11, 22, 60, 3],  [16, 9, 6, 10]),
    (128, 2, [11, 21, 61, 3],  [22, 12, 9, 14]),
    (128, 1, [11, 20, 62, 3],  [24, 17, 13, 19]),
    (160, 5, [11, 19, 87, 3],  [5, 4, 2, 4]),
    (160, 4, [11, 23, 83, 3],  [11, 6, 5, 9]),
    (160, 3, [11, 24, 82, 3],  [16, 8, 6, 11]),
    (160, 2, [11, 21, 85, 3],  [22, 11, 9, 13]),
    (160, 1, [11, 22, 84, 3],  [24, 18, 12, 19]),
    (192, 5, [11, 20, 110, 3], [6, 4, 2, 5]),
    (192, 4, [11, 22, 108, 3], [10, 6, 4, 9]),
    (192, 3, [11, 24, 106, 3], [16, 10, 6, 11]),
    (192, 2, [11, 21, 109, 3], [22, 13, 9, 13]),
    (192, 1, [11, 21, 109, 3], [24, 20, 13, 24]),
    (224, 5, [12, 22, 131, 3], [8, 6, 2, 6]),
    (224, 4, [12, 26, 127, 3], [12, 8, 4, 11]),
    (224, 3, [11, 20, 134, 3], [16, 10, 7, 12]),
    (224, 2, [11, 22, 132, 3], [24, 16, 10, 15]),
    (224, 1, [11, 24, 130, 3], [24, 20, 12, 20]),
    (256, 5, [11, 24, 154, 3], [6, 5, 2, 5]),
    (256, 4, [11, 24, 154, 3], [12, 9, 5, 10]),
    (256, 3, [11, 27, 151, 3], [16, 10, 7, 10]),
    (256, 2, [11, 22, 156, 3], [24, 14, 10, 13]),
    (256, 1, [11, 26, 152, 3], [24, 19, 14, 18]),
    (320, 5, [11, 26, 200, 3], [8, 5, 2, 6]),
    (320, 4, [11, 25, 201, 3], [13, 9, 5, 10]),
    (320, 2, [11, 26, 200, 3], [24, 17, 9, 17]),
    (384, 5, [11, 27, 247, 3], [8, 6, 2, 7]),
    (384, 3, [11, 24, 250, 3], [16, 9, 7, 10]),
    (384, 1, [12, 28, 245, 3], [24, 20, 14, 23]),
];

/// Profile for one row of the UEP table.
pub fn uep_profile(index: usize) -> ProtectionProfile {
    let (bitrate_kbps, _level, lengths, pis) = UEP_TABLE[index];
    let rules = lengths
        .iter()
        .zip(pis.iter())
        .filter(|(l, _)| **l > 0)
        .map(|(&blocks, &pi)| PuncturingRule { blocks, pi })
        .collect();
    ProtectionProfile { rules, bitrate_kbps }
}

/// Number of UEP table rows; the five-bit short-form TPL index can
/// only address the first half, matching the transported range of
/// ETI.
pub fn uep_table_len() -> usize {
    UEP_TABLE.len()
}

/// Build the profile selected by a TPL field and check it against
/// the transported stream length (STL, in 8-byte units).
pub fn profile_from_tpl(tpl: u8, stl: u16) -> Result<ProtectionProfile> {
    // STL × 64 bits per 24 ms frame.
    let bitrate_kbps = (stl as u32 * 64) / 24;
    if (stl as u32 * 64) % 24 != 0 {
        return Err(EtiError::ProtectionMismatch { stl, bitrate: bitrate_kbps }.into());
    }

    if tpl & 0x20 == 0 {
        // Short form: direct UEP table index.
        let profile = uep_profile((tpl & 0x1F) as usize);
        if profile.bitrate_kbps != bitrate_kbps {
            return Err(EtiError::ProtectionMismatch { stl, bitrate: bitrate_kbps }.into());
        }
        Ok(profile)
    } else {
        // Long form: EEP, option bits 4..2, level bits 1..0.
        let option = (tpl >> 2) & 0x7;
        let level = (tpl & 0x3) + 1;
        let rules = match option {
            0 => {
                // EEP-A: bitrate 8n kbit/s
                if bitrate_kbps % 8 != 0 {
                    return Err(EtiError::UnsupportedProtection { tpl }.into());
                }
                let n = (bitrate_kbps / 8) as usize;
                match (level, n) {
                    (1, _) => vec![
                        PuncturingRule { blocks: 6 * n - 3, pi: 24 },
                        PuncturingRule { blocks: 3, pi: 23 },
                    ],
                    (2, 1) => vec![
                        PuncturingRule { blocks: 5, pi: 13 },
                        PuncturingRule { blocks: 1, pi: 12 },
                    ],
                    (2, _) => vec![
                        PuncturingRule { blocks: 2 * n - 3, pi: 14 },
                        PuncturingRule { blocks: 4 * n + 3, pi: 13 },
                    ],
                    (3, _) => vec![
                        PuncturingRule { blocks: 6 * n - 3, pi: 8 },
                        PuncturingRule { blocks: 3, pi: 7 },
                    ],
                    (4, _) => vec![
                        PuncturingRule { blocks: 4 * n - 3, pi: 3 },
                        PuncturingRule { blocks: 2 * n + 3, pi: 2 },
                    ],
                    _ => return Err(EtiError::UnsupportedProtection { tpl }.into()),
                }
            }
            1 => {
                // EEP-B: bitrate 32n kbit/s
                if bitrate_kbps % 32 != 0 {
                    return Err(EtiError::UnsupportedProtection { tpl }.into());
                }
                let n = (bitrate_kbps / 32) as usize;
                let (pi1, pi2) = match level {
                    1 => (10, 9),
                    2 => (6, 5),
                    3 => (4, 3),
                    4 => (2, 1),
                    _ => return Err(EtiError::UnsupportedProtection { tpl }.into()),
                };
                vec![
                    PuncturingRule { blocks: 24 * n - 3, pi: pi1 },
                    PuncturingRule { blocks: 3, pi: pi2 },
                ]
            }
            _ => return Err(EtiError::UnsupportedProtection { tpl }.into()),
        };
        Ok(ProtectionProfile { rules, bitrate_kbps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pi_pattern_keeps_8_plus_pi() {
        for pi in 1..=24 {
            let kept: usize = pi_pattern(pi).iter().map(|&b| b as usize).sum();
            assert_eq!(kept, 8 + pi, "PI_{}", pi);
        }
    }

    #[test]
    fn test_pi_pattern_known_vectors() {
        // PI_1 keeps the first pair of the first group only.
        let mut expected = [0u8; 32];
        for g in 0..8 {
            expected[g * 4] = 1;
        }
        expected[1] = 1;
        assert_eq!(pi_pattern(1), expected);

        // PI_8 keeps the first two bits of every group.
        let p8 = pi_pattern(8);
        for g in 0..8 {
            assert_eq!(&p8[g * 4..g * 4 + 4], &[1, 1, 0, 0]);
        }

        // PI_24 keeps everything except the last bit of group 7.
        let p24 = pi_pattern(24);
        assert_eq!(p24.iter().map(|&b| b as usize).sum::<usize>(), 32);
    }

    #[test]
    fn test_tail_pattern_keeps_12() {
        assert_eq!(TAIL_PATTERN.iter().map(|&b| b as usize).sum::<usize>(), 12);
    }

    #[test]
    fn test_uep_table_closure() {
        // Every profile must consume exactly the mother output of
        // its bitrate and fill whole capacity units after padding.
        for index in 0..uep_table_len() {
            let (bitrate, level, ..) = UEP_TABLE[index];
            let profile = uep_profile(index);
            let input_bits = (bitrate * 24) as usize;
            assert_eq!(
                profile.mother_bits(),
                4 * (input_bits + 6),
                "UEP index {index} ({bitrate} kbit/s PL{level})"
            );
            assert_eq!((profile.punctured_bits() + profile.padding_bits()) % 64, 0);
        }
    }

    #[test]
    fn test_uep_short_form_tpl_selects_table_rows() {
        // The five addressable bits reach the first half of the
        // table; each row accepts exactly its own stream length.
        for index in 0..32usize {
            let (bitrate, ..) = UEP_TABLE[index];
            let stl = (bitrate * 3 / 8) as u16;
            let profile = profile_from_tpl(index as u8, stl).unwrap();
            assert_eq!(profile.bitrate_kbps, bitrate);
        }
    }

    #[test]
    fn test_uep_32kbps_sizes() {
        // Classic sizes from the UEP table: 32 kbit/s at PL5..PL1
        // occupies 16/21/24/29/35 capacity units.
        let expected = [16, 21, 24, 29, 35];
        for (i, &cu) in expected.iter().enumerate() {
            let profile = profile_from_tpl(i as u8, 12).unwrap();
            assert_eq!(profile.capacity_units(), cu, "PL{}", 5 - i);
        }
    }

    #[test]
    fn test_eep_3a_rate_half() {
        // EEP 3-A occupies 6n CU and is rate 1/2 up to the tail.
        for n in [1usize, 3, 9, 16] {
            let bitrate = 8 * n as u32;
            let stl = (bitrate * 3 / 8) as u16;
            let profile = profile_from_tpl(0b100010, stl).unwrap();
            assert_eq!(profile.capacity_units(), 6 * n);
            assert_eq!(profile.punctured_bits(), 6 * n * 64);
            assert_eq!(profile.mother_bits(), 4 * (bitrate as usize * 24 + 6));
        }
    }

    #[test]
    fn test_eep_a_sizes_all_levels() {
        // 12n / 8n / 6n / 4n CU for levels 1..4 at 8n kbit/s.
        let n = 4usize;
        let stl = (8 * n as u32 * 3 / 8) as u16;
        for (level, cu) in [(0u8, 12 * n), (1, 8 * n), (2, 6 * n), (3, 4 * n)] {
            let profile = profile_from_tpl(0b100000 | level, stl).unwrap();
            assert_eq!(profile.capacity_units(), cu);
        }
    }

    #[test]
    fn test_eep_b_sizes_all_levels() {
        // 27n / 21n / 18n / 15n CU for levels 1..4 at 32n kbit/s.
        let n = 2usize;
        let stl = (32 * n as u32 * 3 / 8) as u16;
        for (level, cu) in [(0u8, 27 * n), (1, 21 * n), (2, 18 * n), (3, 15 * n)] {
            let profile = profile_from_tpl(0b100100 | level, stl).unwrap();
            assert_eq!(profile.capacity_units(), cu);
        }
    }

    #[test]
    fn test_eep_2a_n1_special_case() {
        let profile = profile_from_tpl(0b100001, 3).unwrap();
        assert_eq!(profile.bitrate_kbps, 8);
        assert_eq!(profile.capacity_units(), 8);
    }

    #[test]
    fn test_puncture_lengths() {
        let profile = profile_from_tpl(0b100010, 9).unwrap(); // EEP 3-A, 24 kbit/s
        let mother = vec![0u8; profile.mother_bits()];
        let out = puncture(&mother, &profile);
        assert_eq!(out.len(), profile.punctured_bits());
    }

    #[test]
    fn test_uep_bitrate_mismatch_rejected() {
        // Index 0 is 32 kbit/s; STL for 64 kbit/s must be refused.
        assert!(profile_from_tpl(0, 24).is_err());
    }
}

//! Phase Reference Symbol.
//!
//! Carrier k carries e^{jπ/2·(h(i,j) + n)} where the row i and the
//! offset n come from the per-mode index table (one entry per 32
//! carriers, j = k − k′) and h is the fixed 4×32 table of EN 300 401.
//!
//! Carrier buffers throughout the OFDM chain are ordered by
//! ascending frequency: index 0 is carrier −K/2, index K−1 is
//! carrier +K/2, DC is omitted.

use num_complex::Complex32;

use crate::ofdm::params::OfdmParams;

#[rustfmt::skip]
const H_TABLE: [[u8; 32]; 4] = [
    [0, 2, 0, 0, 0, 0, 1, 1, 2, 0, 0, 0, 2, 2, 1, 1,
     0, 2, 0, 0, 0, 0, 1, 1, 2, 0, 0, 0, 2, 2, 1, 1],
    [0, 3, 2, 3, 0, 1, 3, 0, 2, 1, 2, 3, 2, 3, 3, 0,
     0, 3, 2, 3, 0, 1, 3, 0, 2, 1, 2, 3, 2, 3, 3, 0],
    [0, 0, 0, 2, 0, 2, 1, 3, 2, 2, 0, 2, 2, 0, 1, 3,
     0, 0, 0, 2, 0, 2, 1, 3, 2, 2, 0, 2, 2, 0, 1, 3],
    [0, 1, 2, 1, 0, 3, 3, 2, 2, 3, 2, 1, 2, 1, 3, 2,
     0, 1, 2, 1, 0, 3, 3, 2, 2, 3, 2, 1, 2, 1, 3, 2],
];

/// (k′, i, n) rows. Negative rows cover k′ ≤ k ≤ k′ + 31, positive
/// rows k′ + 1 ≤ k ≤ k′ + 32 (there is no carrier zero).
#[rustfmt::skip]
const INDEX_TM1: [(i32, usize, u8); 48] = [
    (-768, 0, 1), (-736, 1, 2), (-704, 2, 0), (-672, 3, 1),
    (-640, 0, 3), (-608, 1, 2), (-576, 2, 2), (-544, 3, 3),
    (-512, 0, 2), (-480, 1, 1), (-448, 2, 2), (-416, 3, 3),
    (-384, 0, 1), (-352, 1, 2), (-320, 2, 3), (-288, 3, 3),
    (-256, 0, 2), (-224, 1, 2), (-192, 2, 2), (-160, 3, 1),
    (-128, 0, 1), (-96, 1, 3),  (-64, 2, 1),  (-32, 3, 2),
    (0, 0, 3),    (32, 3, 1),   (64, 2, 1),   (96, 1, 1),
    (128, 0, 2),  (160, 3, 2),  (192, 2, 1),  (224, 1, 0),
    (256, 0, 2),  (288, 3, 2),  (320, 2, 3),  (352, 1, 3),
    (384, 0, 0),  (416, 3, 2),  (448, 2, 1),  (480, 1, 3),
    (512, 0, 3),  (544, 3, 3),  (576, 2, 3),  (608, 1, 0),
    (640, 0, 3),  (672, 3, 0),  (704, 2, 1),  (736, 1, 1),
];

#[rustfmt::skip]
const INDEX_TM2: [(i32, usize, u8); 12] = [
    (-192, 0, 2), (-160, 1, 3), (-128, 2, 2), (-96, 3, 2),
    (-64, 0, 1),  (-32, 1, 2),
    (0, 2, 0),    (32, 1, 2),   (64, 0, 2),   (96, 3, 1),
    (128, 2, 0),  (160, 1, 3),
];

#[rustfmt::skip]
const INDEX_TM3: [(i32, usize, u8); 6] = [
    (-96, 0, 2), (-64, 1, 3), (-32, 2, 0),
    (0, 3, 2),   (32, 2, 2),  (64, 1, 2),
];

#[rustfmt::skip]
const INDEX_TM4: [(i32, usize, u8); 24] = [
    (-384, 0, 0), (-352, 1, 1), (-320, 2, 1), (-288, 3, 2),
    (-256, 0, 2), (-224, 1, 2), (-192, 2, 0), (-160, 3, 3),
    (-128, 0, 3), (-96, 1, 1),  (-64, 2, 3),  (-32, 3, 2),
    (0, 0, 2),    (32, 1, 1),   (64, 2, 0),   (96, 3, 3),
    (128, 0, 3),  (160, 1, 2),  (192, 2, 1),  (224, 3, 3),
    (256, 0, 1),  (288, 1, 3),  (320, 2, 3),  (352, 3, 3),
];

fn index_table(mode: u8) -> &'static [(i32, usize, u8)] {
    match mode {
        1 => &INDEX_TM1,
        2 => &INDEX_TM2,
        3 => &INDEX_TM3,
        _ => &INDEX_TM4,
    }
}

/// Position of carrier k (k ≠ 0) in an ascending-frequency carrier
/// buffer of K entries.
pub fn carrier_index(k: i32, carriers: usize) -> usize {
    let half = (carriers / 2) as i32;
    debug_assert!(k != 0 && k >= -half && k <= half);
    if k < 0 {
        (k + half) as usize
    } else {
        (k + half - 1) as usize
    }
}

pub struct PhaseReference {
    symbol: Vec<Complex32>,
}

impl PhaseReference {
    pub fn new(params: &OfdmParams) -> Self {
        let half = (params.carriers / 2) as i32;
        let table = index_table(params.mode);
        let mut symbol = vec![Complex32::new(0.0, 0.0); params.carriers];
        for k in -half..=half {
            if k == 0 {
                continue;
            }
            let row = table
                .iter()
                .rev()
                .find(|(kp, _, _)| if k < 0 { *kp <= k } else { *kp < k })
                .expect("index table covers the carrier range");
            let (kp, i, n) = *row;
            let j = (if k < 0 { k - kp } else { k - 1 - kp }) as usize;
            let phase = std::f32::consts::FRAC_PI_2 * (H_TABLE[i][j] + n) as f32;
            symbol[carrier_index(k, params.carriers)] = Complex32::new(phase.cos(), phase.sin());
        }
        PhaseReference { symbol }
    }

    /// The PRS carriers, ascending frequency, unit magnitude.
    pub fn symbol(&self) -> &[Complex32] {
        &self.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_carrier_index_skips_dc() {
        assert_eq!(carrier_index(-768, 1536), 0);
        assert_eq!(carrier_index(-1, 1536), 767);
        assert_eq!(carrier_index(1, 1536), 768);
        assert_eq!(carrier_index(768, 1536), 1535);
    }

    #[test]
    fn test_prs_has_unit_magnitude_quarter_phases() {
        for mode in 1..=4u8 {
            let params = OfdmParams::new(mode).unwrap();
            let prs = PhaseReference::new(&params);
            assert_eq!(prs.symbol().len(), params.carriers);
            for c in prs.symbol() {
                assert_abs_diff_eq!(c.norm(), 1.0, epsilon = 1e-6);
                // Phases are multiples of π/2: one component is ±1,
                // the other 0.
                let re_int = c.re.abs() < 1e-6 || (c.re.abs() - 1.0).abs() < 1e-6;
                let im_int = c.im.abs() < 1e-6 || (c.im.abs() - 1.0).abs() < 1e-6;
                assert!(re_int && im_int);
            }
        }
    }

    #[test]
    fn test_index_table_covers_range() {
        for mode in 1..=4u8 {
            let params = OfdmParams::new(mode).unwrap();
            let table = index_table(mode);
            assert_eq!(table.len() * 32, params.carriers);
            assert_eq!(table[0].0, -(params.carriers as i32) / 2);
            // Rows ascend in steps of 32.
            for pair in table.windows(2) {
                assert_eq!(pair[1].0 - pair[0].0, 32);
            }
        }
    }

    #[test]
    fn test_first_carrier_phase_tm1() {
        // k = −768 lies in the row (−768, i=0, n=1), j = 0,
        // h(0,0) = 0, so the phase is π/2.
        let params = OfdmParams::new(1).unwrap();
        let prs = PhaseReference::new(&params);
        let c = prs.symbol()[0];
        assert_abs_diff_eq!(c.re, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.im, 1.0, epsilon = 1e-6);
    }
}

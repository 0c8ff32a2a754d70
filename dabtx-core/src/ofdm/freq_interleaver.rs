//! Frequency interleaving.
//!
//! The mode-dependent permutation is generated by the recurrence
//! A(i) = (13·A(i−1) + d) mod N; values inside the active band
//! (excluding the DC bin) are kept in order and assign QPSK symbol
//! number n to carrier A_kept(n) − N/2.

use num_complex::Complex32;

use crate::ofdm::params::OfdmParams;
use crate::ofdm::phase_ref::carrier_index;

pub struct FrequencyInterleaver {
    /// For each carrier position (ascending frequency), the index of
    /// the QPSK symbol transmitted there.
    map: Vec<usize>,
}

impl FrequencyInterleaver {
    pub fn new(params: &OfdmParams) -> Self {
        let (modulo, increment) = match params.mode {
            1 => (2048u32, 511u32),
            2 => (512, 127),
            3 => (256, 63),
            _ => (1024, 255),
        };
        let carriers = params.carriers as u32;
        let center = modulo / 2;
        let low = center - carriers / 2;
        let high = center + carriers / 2;

        let mut map = vec![0usize; params.carriers];
        let mut a = 0u32;
        let mut n = 0usize;
        // One pass over the recurrence yields exactly K in-band
        // values.
        for _ in 0..modulo {
            a = (13 * a + increment) % modulo;
            if a >= low && a <= high && a != center && n < params.carriers {
                let k = a as i32 - center as i32;
                map[carrier_index(k, params.carriers)] = n;
                n += 1;
            }
        }
        debug_assert_eq!(n, params.carriers);
        FrequencyInterleaver { map }
    }

    /// QPSK symbol index carried on the given carrier position.
    pub fn source_index(&self, carrier_position: usize) -> usize {
        self.map[carrier_position]
    }

    /// Permute one symbol's QPSK vector into carrier order.
    pub fn interleave(&self, symbols: &[Complex32]) -> Vec<Complex32> {
        debug_assert_eq!(symbols.len(), self.map.len());
        self.map.iter().map(|&n| symbols[n]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_a_permutation() {
        for mode in 1..=4u8 {
            let params = OfdmParams::new(mode).unwrap();
            let fi = FrequencyInterleaver::new(&params);
            let mut seen = vec![false; params.carriers];
            for pos in 0..params.carriers {
                let n = fi.source_index(pos);
                assert!(!seen[n], "mode {} duplicates symbol {}", mode, n);
                seen[n] = true;
            }
        }
    }

    #[test]
    fn test_mode_1_first_assignments() {
        // A(1) = 511 is below the band; the first in-band value of
        // the recurrence determines where symbol 0 lands.
        let params = OfdmParams::new(1).unwrap();
        let fi = FrequencyInterleaver::new(&params);
        let mut a = 0u32;
        let first_k;
        loop {
            a = (13 * a + 511) % 2048;
            if (256..=1792).contains(&a) && a != 1024 {
                first_k = a as i32 - 1024;
                break;
            }
        }
        assert_eq!(fi.source_index(carrier_index(first_k, 1536)), 0);
    }

    #[test]
    fn test_interleave_moves_symbols() {
        let params = OfdmParams::new(3).unwrap();
        let fi = FrequencyInterleaver::new(&params);
        let symbols: Vec<Complex32> = (0..params.carriers)
            .map(|i| Complex32::new(i as f32, 0.0))
            .collect();
        let out = fi.interleave(&symbols);
        for pos in 0..params.carriers {
            assert_eq!(out[pos].re as usize, fi.source_index(pos));
        }
    }
}

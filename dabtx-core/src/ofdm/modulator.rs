//! π/4-shifted differential QPSK modulation.
//!
//! Carrier k of symbol l is the product of carrier k of symbol l−1
//! and the frequency-interleaved QPSK symbol; the phase reference
//! symbol seeds the chain at the start of every transmission frame.

use num_complex::Complex32;

use crate::ofdm::freq_interleaver::FrequencyInterleaver;
use crate::ofdm::mapper::map_symbol;
use crate::ofdm::params::OfdmParams;
use crate::ofdm::phase_ref::PhaseReference;

pub struct DifferentialModulator {
    params: OfdmParams,
    phase_ref: PhaseReference,
    interleaver: FrequencyInterleaver,
}

impl DifferentialModulator {
    pub fn new(params: OfdmParams) -> Self {
        DifferentialModulator {
            phase_ref: PhaseReference::new(&params),
            interleaver: FrequencyInterleaver::new(&params),
            params,
        }
    }

    pub fn phase_ref(&self) -> &[Complex32] {
        self.phase_ref.symbol()
    }

    /// Turn the data bits of one transmission frame into carrier
    /// symbols: the PRS followed by the differentially modulated
    /// data symbols. Output length is symbols_per_frame × carriers.
    pub fn modulate(&self, bits: &[u8]) -> Vec<Complex32> {
        let k = self.params.carriers;
        debug_assert_eq!(bits.len(), self.params.data_bits_per_tx_frame());

        let mut out = Vec::with_capacity(self.params.symbols_per_frame * k);
        out.extend_from_slice(self.phase_ref.symbol());

        for symbol_bits in bits.chunks_exact(self.params.bits_per_symbol()) {
            let qpsk = map_symbol(symbol_bits);
            let prev_start = out.len() - k;
            for pos in 0..k {
                let y = qpsk[self.interleaver.source_index(pos)];
                let z = out[prev_start + pos] * y;
                out.push(z);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_output_shape() {
        let params = OfdmParams::new(2).unwrap();
        let dm = DifferentialModulator::new(params);
        let bits = vec![0u8; params.data_bits_per_tx_frame()];
        let out = dm.modulate(&bits);
        assert_eq!(out.len(), params.symbols_per_frame * params.carriers);
        assert_eq!(&out[..params.carriers], dm.phase_ref());
    }

    #[test]
    fn test_unit_magnitude_everywhere() {
        let params = OfdmParams::new(3).unwrap();
        let dm = DifferentialModulator::new(params);
        let bits: Vec<u8> = (0..params.data_bits_per_tx_frame())
            .map(|i| ((i * 7 + 3) % 5 < 2) as u8)
            .collect();
        for c in dm.modulate(&bits) {
            assert_abs_diff_eq!(c.norm(), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_differential_round_trip() {
        // Dividing each symbol by its predecessor recovers the
        // frequency-interleaved QPSK vector exactly.
        let params = OfdmParams::new(2).unwrap();
        let dm = DifferentialModulator::new(params);
        let bits: Vec<u8> = (0..params.data_bits_per_tx_frame())
            .map(|i| (i % 3 == 0) as u8)
            .collect();
        let out = dm.modulate(&bits);

        let k = params.carriers;
        for l in 1..params.symbols_per_frame {
            let symbol_bits = &bits[(l - 1) * 2 * k..l * 2 * k];
            let qpsk = crate::ofdm::mapper::map_symbol(symbol_bits);
            for pos in 0..k {
                let ratio = out[l * k + pos] / out[(l - 1) * k + pos];
                let expected = qpsk[dm.interleaver.source_index(pos)];
                assert_abs_diff_eq!(ratio.re, expected.re, epsilon = 1e-4);
                assert_abs_diff_eq!(ratio.im, expected.im, epsilon = 1e-4);
            }
        }
    }
}

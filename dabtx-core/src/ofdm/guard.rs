//! Null symbol and cyclic guard-interval insertion.
//!
//! The IFFT output of one transmission frame is 1 + symbols_per_frame
//! blocks of `spacing` samples, the first being the null symbol's
//! carriers (zeros or TII). Each block is extended at the front by a
//! cyclic prefix: null_size − spacing samples for the null symbol,
//! symbol_size − spacing for the others. An optional raised-cosine
//! overlap crossfades consecutive symbol boundaries.

use num_complex::Complex32;

use crate::ofdm::params::OfdmParams;

pub struct GuardIntervalInserter {
    params: OfdmParams,
    /// Overlap window length in samples; zero disables windowing.
    window_overlap: usize,
    /// Rising half of the raised-cosine window.
    ramp: Vec<f32>,
}

impl GuardIntervalInserter {
    pub fn new(params: OfdmParams, window_overlap: usize) -> Self {
        let window_overlap = window_overlap.min(params.guard_size());
        let ramp = (0..window_overlap)
            .map(|i| {
                let x = (i as f32 + 0.5) / window_overlap as f32;
                0.5 * (1.0 - (std::f32::consts::PI * x).cos())
            })
            .collect();
        GuardIntervalInserter {
            params,
            window_overlap,
            ramp,
        }
    }

    /// Expand one transmission frame of IFFT blocks into guarded
    /// samples. Output length equals `samples_per_tx_frame`.
    pub fn process(&self, ifft_out: &[Complex32], out: &mut Vec<Complex32>) {
        let p = &self.params;
        debug_assert_eq!(ifft_out.len(), (1 + p.symbols_per_frame) * p.spacing);

        out.clear();
        out.reserve(p.samples_per_tx_frame());

        for (index, block) in ifft_out.chunks_exact(p.spacing).enumerate() {
            let total = if index == 0 { p.null_size } else { p.symbol_size };
            let prefix = total - p.spacing;
            let start = out.len();
            out.extend_from_slice(&block[p.spacing - prefix..]);
            out.extend_from_slice(block);

            if self.window_overlap > 0 && index > 0 {
                // Crossfade the symbol head with the cyclic
                // continuation of the previous symbol.
                let prev_block_start = start - p.spacing;
                for (i, &w) in self.ramp.iter().enumerate() {
                    let tail = out[prev_block_start + i];
                    out[start + i] = out[start + i] * w + tail * (1.0 - w);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_block(params: &OfdmParams, value: f32) -> Vec<Complex32> {
        (0..params.spacing)
            .map(|i| Complex32::new(value, i as f32))
            .collect()
    }

    #[test]
    fn test_output_length_per_mode() {
        for mode in 1..=4u8 {
            let params = OfdmParams::new(mode).unwrap();
            let gi = GuardIntervalInserter::new(params, 0);
            let ifft = vec![
                Complex32::new(0.0, 0.0);
                (1 + params.symbols_per_frame) * params.spacing
            ];
            let mut out = Vec::new();
            gi.process(&ifft, &mut out);
            assert_eq!(out.len(), params.samples_per_tx_frame(), "mode {}", mode);
        }
    }

    #[test]
    fn test_cyclic_prefix_copies_symbol_tail() {
        let params = OfdmParams::new(2).unwrap();
        let gi = GuardIntervalInserter::new(params, 0);
        let mut ifft = Vec::new();
        for s in 0..=params.symbols_per_frame {
            ifft.extend(ramp_block(&params, s as f32));
        }
        let mut out = Vec::new();
        gi.process(&ifft, &mut out);

        // First data symbol starts after the null symbol.
        let sym = &out[params.null_size..params.null_size + params.symbol_size];
        let guard = params.guard_size();
        // Prefix equals the last `guard` samples of the symbol body.
        assert_eq!(&sym[..guard], &sym[params.spacing..]);
        // Body is the untouched IFFT block of symbol 1.
        assert_eq!(&sym[guard..], &ifft[params.spacing..2 * params.spacing]);
    }

    #[test]
    fn test_null_symbol_prefix_length() {
        let params = OfdmParams::new(1).unwrap();
        let gi = GuardIntervalInserter::new(params, 0);
        let mut ifft = ramp_block(&params, 7.0);
        for _ in 0..params.symbols_per_frame {
            ifft.extend(ramp_block(&params, 0.0));
        }
        let mut out = Vec::new();
        gi.process(&ifft, &mut out);
        let null_prefix = params.null_size - params.spacing;
        assert_eq!(out[0], ifft[params.spacing - null_prefix]);
        assert_eq!(out[null_prefix], ifft[0]);
    }

    #[test]
    fn test_window_overlap_preserves_length_and_blends() {
        let params = OfdmParams::new(2).unwrap();
        let overlap = 16;
        let gi = GuardIntervalInserter::new(params, overlap);
        let mut ifft = Vec::new();
        for s in 0..=params.symbols_per_frame {
            ifft.extend(ramp_block(&params, s as f32));
        }
        let mut out = Vec::new();
        gi.process(&ifft, &mut out);
        assert_eq!(out.len(), params.samples_per_tx_frame());

        // At a symbol boundary the first blended sample leans
        // towards the previous symbol's continuation.
        let boundary = params.null_size;
        let blended = out[boundary].re;
        assert!(blended < 1.0, "expected crossfade, got {}", blended);
    }
}

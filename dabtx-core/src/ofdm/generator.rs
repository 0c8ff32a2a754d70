//! OFDM symbol synthesis: carrier placement and IFFT.
//!
//! Carrier buffers arrive in ascending-frequency order (−K/2..−1,
//! +1..+K/2). Positive carriers go to the low IFFT bins starting at
//! one, negative carriers to the top bins; the DC bin and the
//! spectral gap of spacing − K − 1 bins between them stay zero.

use num_complex::Complex32;

use crate::fft::Fft;
use crate::ofdm::params::OfdmParams;

pub struct OfdmGenerator {
    params: OfdmParams,
    ifft: Fft,
    fft_buf: Vec<Complex32>,
}

impl OfdmGenerator {
    pub fn new(params: OfdmParams) -> Self {
        OfdmGenerator {
            ifft: Fft::inverse(params.spacing),
            fft_buf: vec![Complex32::new(0.0, 0.0); params.spacing],
            params,
        }
    }

    /// Synthesise the time-domain samples (without guard intervals)
    /// for a sequence of carrier symbols. Input length must be a
    /// multiple of the carrier count; output holds `spacing` samples
    /// per symbol.
    pub fn process(&mut self, carriers_in: &[Complex32], out: &mut Vec<Complex32>) {
        let k = self.params.carriers;
        let spacing = self.params.spacing;
        debug_assert_eq!(carriers_in.len() % k, 0);

        out.clear();
        out.reserve(carriers_in.len() / k * spacing);

        let half = k / 2;
        for symbol in carriers_in.chunks_exact(k) {
            self.fft_buf.fill(Complex32::new(0.0, 0.0));
            // Positive frequencies: bins 1..=K/2.
            self.fft_buf[1..=half].copy_from_slice(&symbol[half..]);
            // Negative frequencies: top K/2 bins.
            self.fft_buf[spacing - half..].copy_from_slice(&symbol[..half]);
            self.ifft.process(&mut self.fft_buf);
            out.extend_from_slice(&self.fft_buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_output_length() {
        let params = OfdmParams::new(2).unwrap();
        let mut gen = OfdmGenerator::new(params);
        let carriers = vec![Complex32::new(0.0, 0.0); params.carriers * 3];
        let mut out = Vec::new();
        gen.process(&carriers, &mut out);
        assert_eq!(out.len(), params.spacing * 3);
    }

    #[test]
    fn test_single_positive_carrier() {
        // Carrier +1 alone must produce exp(+j·2π·t/N).
        let params = OfdmParams::new(3).unwrap();
        let mut gen = OfdmGenerator::new(params);
        let mut carriers = vec![Complex32::new(0.0, 0.0); params.carriers];
        carriers[params.carriers / 2] = Complex32::new(1.0, 0.0); // k = +1
        let mut out = Vec::new();
        gen.process(&carriers, &mut out);
        let n = params.spacing as f32;
        for (t, sample) in out.iter().enumerate() {
            let phase = std::f32::consts::TAU * t as f32 / n;
            assert_abs_diff_eq!(sample.re, phase.cos(), epsilon = 1e-4);
            assert_abs_diff_eq!(sample.im, phase.sin(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_single_negative_carrier() {
        // Carrier −1 (last entry of the negative half) must rotate
        // the other way.
        let params = OfdmParams::new(3).unwrap();
        let mut gen = OfdmGenerator::new(params);
        let mut carriers = vec![Complex32::new(0.0, 0.0); params.carriers];
        carriers[params.carriers / 2 - 1] = Complex32::new(1.0, 0.0); // k = -1
        let mut out = Vec::new();
        gen.process(&carriers, &mut out);
        let n = params.spacing as f32;
        for (t, sample) in out.iter().enumerate() {
            let phase = -std::f32::consts::TAU * t as f32 / n;
            assert_abs_diff_eq!(sample.re, phase.cos(), epsilon = 1e-4);
            assert_abs_diff_eq!(sample.im, phase.sin(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_dc_and_gap_are_empty() {
        // Drive every carrier and check by forward transform that
        // the DC bin and the gap stayed empty.
        let params = OfdmParams::new(2).unwrap();
        let mut gen = OfdmGenerator::new(params);
        let carriers = vec![Complex32::new(1.0, 0.0); params.carriers];
        let mut out = Vec::new();
        gen.process(&carriers, &mut out);

        let mut fwd = crate::fft::Fft::forward(params.spacing);
        fwd.process(&mut out[..params.spacing]);
        let n = params.spacing as f32;
        let half = params.carriers / 2;
        assert_abs_diff_eq!(out[0].norm() / n, 0.0, epsilon = 1e-4);
        for bin in half + 1..params.spacing - half {
            assert_abs_diff_eq!(out[bin].norm() / n, 0.0, epsilon = 1e-4);
        }
        for bin in 1..=half {
            assert_abs_diff_eq!(out[bin].norm() / n, 1.0, epsilon = 1e-3);
        }
    }
}

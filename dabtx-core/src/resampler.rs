//! Rational L/M resampler between the OFDM rate and the SDR rate.
//!
//! FFT-overlap method: the input is processed in half-overlapping
//! blocks of `fft_size_in` samples under a Hann window, the spectrum
//! halves are copied into a transform of size `fft_size_out`
//! (zero-padded or truncated around the band edge), and the inverse
//! transform's halves are overlap-added. The transforms are scaled
//! by 1/max(Nin, Nout), so the steady-state amplitude scales by M/L.

use num_complex::Complex32;

use crate::buffer::Buffer;
use crate::errors::{DspError, Result};
use crate::fft::Fft;
use crate::flowgraph::ModCodec;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

pub struct Resampler {
    /// Interpolation factor.
    l: usize,
    /// Decimation factor.
    m: usize,
    fft_size_in: usize,
    fft_size_out: usize,
    scale: f32,
    window: Vec<f32>,
    fwd: Fft,
    inv: Fft,
    /// Previous input half-block.
    buffer_in: Vec<Complex32>,
    /// Pending second half of the previous inverse transform.
    buffer_out: Vec<Complex32>,
}

impl Resampler {
    pub fn new(input_rate: usize, output_rate: usize, resolution: usize) -> Self {
        let divisor = gcd(input_rate, output_rate);
        let l = output_rate / divisor;
        let m = input_rate / divisor;
        let mut factor = resolution * 2 / m;
        if factor % 2 == 1 {
            factor += 1;
        }
        let factor = factor.max(2);
        let fft_size_in = factor * m;
        let fft_size_out = factor * l;
        let scale = 1.0 / fft_size_in.max(fft_size_out) as f32;

        let window = (0..fft_size_in)
            .map(|i| {
                0.5 * (1.0
                    - (std::f32::consts::TAU * i as f32 / (fft_size_in - 1) as f32).cos())
            })
            .collect();

        Resampler {
            l,
            m,
            fft_size_in,
            fft_size_out,
            scale,
            window,
            fwd: Fft::forward(fft_size_in),
            inv: Fft::inverse(fft_size_out),
            buffer_in: vec![Complex32::new(0.0, 0.0); fft_size_in / 2],
            buffer_out: vec![Complex32::new(0.0, 0.0); fft_size_out / 2],
        }
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.l, self.m)
    }

    /// Resample; the input length must be a multiple of half the
    /// input transform size.
    pub fn resample(&mut self, input: &[Complex32], out: &mut Vec<Complex32>) -> Result<()> {
        let half_in = self.fft_size_in / 2;
        let half_out = self.fft_size_out / 2;
        if input.len() % half_in != 0 {
            return Err(DspError::InvalidInputSize {
                expected: input.len().next_multiple_of(half_in),
                actual: input.len(),
            }
            .into());
        }

        out.clear();
        out.reserve(input.len() / self.m * self.l);

        let mut front = vec![Complex32::new(0.0, 0.0); self.fft_size_in];
        let mut back = vec![Complex32::new(0.0, 0.0); self.fft_size_out];

        for chunk in input.chunks_exact(half_in) {
            front[..half_in].copy_from_slice(&self.buffer_in);
            front[half_in..].copy_from_slice(chunk);
            self.buffer_in.copy_from_slice(chunk);
            for (sample, w) in front.iter_mut().zip(self.window.iter()) {
                *sample *= *w;
            }
            self.fwd.process(&mut front);

            back.fill(Complex32::new(0.0, 0.0));
            if self.fft_size_out > self.fft_size_in {
                // Zero-pad around the band edge; the input Nyquist
                // bin is copied to both images.
                back[..half_in].copy_from_slice(&front[..half_in]);
                back[self.fft_size_out - half_in..].copy_from_slice(&front[half_in..]);
                back[half_in] = front[half_in];
            } else {
                // Truncate; the output Nyquist bin averages the two
                // contributions.
                back[..half_out].copy_from_slice(&front[..half_out]);
                back[half_out..].copy_from_slice(&front[self.fft_size_in - half_out..]);
                back[half_out] = (back[half_out] + front[half_out]) * 0.5;
            }
            for sample in back.iter_mut() {
                *sample *= self.scale;
            }
            self.inv.process(&mut back);

            for k in 0..half_out {
                out.push(self.buffer_out[k] + back[k]);
            }
            self.buffer_out.copy_from_slice(&back[half_out..]);
        }
        Ok(())
    }
}

impl ModCodec for Resampler {
    fn name(&self) -> &str {
        "Resampler"
    }

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
        let mut resampled = Vec::new();
        self.resample(input.as_complex(), &mut resampled)?;
        out.set_complex_len(resampled.len());
        out.as_complex_mut().copy_from_slice(&resampled);
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ratio_reduction() {
        let r = Resampler::new(2_048_000, 4_096_000, 512);
        assert_eq!(r.ratio(), (2, 1));
        let r = Resampler::new(2_048_000, 3_072_000, 512);
        assert_eq!(r.ratio(), (3, 2));
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let mut r = Resampler::new(2_048_000, 4_096_000, 512);
        let input = vec![Complex32::new(1.0, 0.0); 4096];
        let mut out = Vec::new();
        r.resample(&input, &mut out).unwrap();
        assert_eq!(out.len(), 8192);
    }

    #[test]
    fn test_invalid_length_rejected() {
        let mut r = Resampler::new(2_048_000, 4_096_000, 512);
        let input = vec![Complex32::new(0.0, 0.0); 100];
        let mut out = Vec::new();
        assert!(r.resample(&input, &mut out).is_err());
    }

    #[test]
    fn test_steady_state_amplitude_upsampling() {
        // Constant input: after the first block the overlap-added
        // Hann windows sum to one and the output settles at M/L.
        let mut r = Resampler::new(1_024_000, 2_048_000, 256);
        let block = vec![Complex32::new(1.0, 0.0); 4096];
        let mut out = Vec::new();
        r.resample(&block, &mut out).unwrap();
        r.resample(&block, &mut out).unwrap();
        for sample in &out[out.len() / 2..] {
            assert_abs_diff_eq!(sample.re, 0.5, epsilon = 1e-3);
            assert_abs_diff_eq!(sample.im, 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_downsampling_preserves_tone_frequency() {
        // A slow complex exponential must survive 2:1 decimation at
        // twice the phase increment per sample.
        let mut r = Resampler::new(2_048_000, 1_024_000, 512);
        let n = 8192;
        let cycles = 16.0;
        let input: Vec<Complex32> = (0..n)
            .map(|t| {
                let phase = std::f32::consts::TAU * cycles * t as f32 / n as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect();
        let mut out = Vec::new();
        r.resample(&input, &mut out).unwrap();
        r.resample(&input, &mut out).unwrap();
        assert_eq!(out.len(), n);

        // Inspect the settled second half: consecutive samples
        // advance by 2× the input phase step.
        let expected_step = std::f32::consts::TAU * cycles * 2.0 / n as f32;
        for w in out[out.len() * 3 / 4..].windows(2) {
            let step = (w[1] * w[0].conj()).arg();
            assert_abs_diff_eq!(step, expected_step, epsilon = 2e-2);
        }
    }
}

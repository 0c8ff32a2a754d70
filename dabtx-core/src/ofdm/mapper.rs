//! QPSK symbol mapping.
//!
//! Two consecutive coded bits form one symbol
//! (1/√2)·((1 − 2·b0) + j·(1 − 2·b1)).

use num_complex::Complex32;

const AMPL: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Map 2·K bits into K QPSK symbols.
pub fn map_symbol(bits: &[u8]) -> Vec<Complex32> {
    debug_assert_eq!(bits.len() % 2, 0);
    bits.chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                AMPL * (1.0 - 2.0 * pair[0] as f32),
                AMPL * (1.0 - 2.0 * pair[1] as f32),
            )
        })
        .collect()
}

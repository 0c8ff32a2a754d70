//! OFDM constants for the four DAB transmission modes, at the
//! nominal 2.048 MHz sample rate.

use crate::errors::{ConfigError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfdmParams {
    pub mode: u8,
    /// Active carriers K (DC excluded).
    pub carriers: usize,
    /// OFDM symbols per transmission frame, phase reference
    /// included, null symbol excluded.
    pub symbols_per_frame: usize,
    /// IFFT size.
    pub spacing: usize,
    /// Data/reference symbol length including the guard interval.
    pub symbol_size: usize,
    /// Null symbol length.
    pub null_size: usize,
    /// ETI frames (24 ms each) per transmission frame.
    pub frames_per_tx: usize,
}

impl OfdmParams {
    pub fn new(mode: u8) -> Result<Self> {
        let params = match mode {
            1 => OfdmParams {
                mode,
                carriers: 1536,
                symbols_per_frame: 76,
                spacing: 2048,
                symbol_size: 2552,
                null_size: 2656,
                frames_per_tx: 4,
            },
            2 => OfdmParams {
                mode,
                carriers: 384,
                symbols_per_frame: 76,
                spacing: 512,
                symbol_size: 638,
                null_size: 664,
                frames_per_tx: 1,
            },
            3 => OfdmParams {
                mode,
                carriers: 192,
                symbols_per_frame: 153,
                spacing: 256,
                symbol_size: 319,
                null_size: 345,
                frames_per_tx: 1,
            },
            4 => OfdmParams {
                mode,
                carriers: 768,
                symbols_per_frame: 76,
                spacing: 1024,
                symbol_size: 1276,
                null_size: 1328,
                frames_per_tx: 2,
            },
            _ => return Err(ConfigError::InvalidMode(mode).into()),
        };
        Ok(params)
    }

    pub fn guard_size(&self) -> usize {
        self.symbol_size - self.spacing
    }

    /// OFDM symbols carrying data (everything but the phase
    /// reference symbol).
    pub fn data_symbols(&self) -> usize {
        self.symbols_per_frame - 1
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.carriers * 2
    }

    pub fn data_bits_per_tx_frame(&self) -> usize {
        self.data_symbols() * self.bits_per_symbol()
    }

    /// Baseband samples per transmission frame at 2.048 MHz.
    pub fn samples_per_tx_frame(&self) -> usize {
        self.null_size + self.symbols_per_frame * self.symbol_size
    }

    /// Transmission frame duration in seconds.
    pub fn frame_duration(&self) -> f64 {
        self.frames_per_tx as f64 * 0.024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_counts_match_frame_durations() {
        // Every mode fills its duration exactly at 2.048 MHz.
        for mode in 1..=4u8 {
            let p = OfdmParams::new(mode).unwrap();
            assert_eq!(
                p.samples_per_tx_frame(),
                (p.frame_duration() * 2_048_000.0).round() as usize,
                "mode {}",
                mode
            );
        }
    }

    #[test]
    fn test_mode_1_constants() {
        let p = OfdmParams::new(1).unwrap();
        assert_eq!(p.carriers, 1536);
        assert_eq!(p.guard_size(), 504);
        assert_eq!(p.samples_per_tx_frame(), 196_608);
        assert_eq!(p.data_bits_per_tx_frame(), 230_400);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(OfdmParams::new(0).is_err());
        assert!(OfdmParams::new(5).is_err());
    }

    #[test]
    fn test_data_bits_hold_fic_and_cifs() {
        use crate::coding::partitioner::CIF_BITS;
        for (mode, fic_coded) in [(1u8, 2304), (2, 2304), (3, 3072), (4, 2304)] {
            let p = OfdmParams::new(mode).unwrap();
            assert_eq!(
                p.data_bits_per_tx_frame(),
                p.frames_per_tx * (fic_coded + CIF_BITS),
                "mode {}",
                mode
            );
        }
    }
}

//! Sample format conversion for SDR front-ends.
//!
//! Converts float I/Q to s16, u8 or s8 with saturation, counting
//! clipped samples; `complexf` passes through unchanged. Inputs are
//! expected to already sit in the target range (the gain stage took
//! care of scaling). Samples at or beyond full scale count as
//! clipped.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::flowgraph::ModCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    ComplexF,
    S16,
    U8,
    S8,
}

impl SampleFormat {
    /// Bytes per I/Q sample pair.
    pub fn size(&self) -> usize {
        match self {
            SampleFormat::ComplexF => 8,
            SampleFormat::S16 => 4,
            SampleFormat::U8 | SampleFormat::S8 => 2,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "complexf" => Ok(SampleFormat::ComplexF),
            "s16" => Ok(SampleFormat::S16),
            "u8" => Ok(SampleFormat::U8),
            "s8" => Ok(SampleFormat::S8),
            other => Err(format!("unknown sample format '{}'", other)),
        }
    }
}

pub struct FormatConverter {
    format: SampleFormat,
    clipped: Arc<AtomicU64>,
}

impl FormatConverter {
    pub fn new(format: SampleFormat) -> Self {
        FormatConverter {
            format,
            clipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn clipped_counter(&self) -> Arc<AtomicU64> {
        self.clipped.clone()
    }

    pub fn convert(&self, input: &[f32], out: &mut Buffer) -> usize {
        let mut clipped = 0u64;
        match self.format {
            SampleFormat::ComplexF => {
                out.set_len(input.len() * 4);
                let dst = out.as_f32_mut();
                dst.copy_from_slice(input);
            }
            SampleFormat::S16 => {
                out.set_len(input.len() * 2);
                let bytes = out.as_bytes_mut();
                for (i, &v) in input.iter().enumerate() {
                    let s = if v <= i16::MIN as f32 {
                        clipped += 1;
                        i16::MIN
                    } else if v >= i16::MAX as f32 {
                        clipped += 1;
                        i16::MAX
                    } else {
                        v as i16
                    };
                    bytes[2 * i..2 * i + 2].copy_from_slice(&s.to_le_bytes());
                }
            }
            SampleFormat::U8 => {
                out.set_len(input.len());
                let bytes = out.as_bytes_mut();
                for (i, &v) in input.iter().enumerate() {
                    let shifted = v + 128.0;
                    bytes[i] = if shifted <= 0.0 {
                        clipped += 1;
                        0
                    } else if shifted >= u8::MAX as f32 {
                        clipped += 1;
                        u8::MAX
                    } else {
                        shifted as u8
                    };
                }
            }
            SampleFormat::S8 => {
                out.set_len(input.len());
                let bytes = out.as_bytes_mut();
                for (i, &v) in input.iter().enumerate() {
                    let s = if v <= i8::MIN as f32 {
                        clipped += 1;
                        i8::MIN
                    } else if v >= i8::MAX as f32 {
                        clipped += 1;
                        i8::MAX
                    } else {
                        v as i8
                    };
                    bytes[i] = s as u8;
                }
            }
        }
        self.clipped.fetch_add(clipped, Ordering::Relaxed);
        clipped as usize
    }
}

impl ModCodec for FormatConverter {
    fn name(&self) -> &str {
        "FormatConverter"
    }

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
        self.convert(input.as_f32(), out);
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_saturation_and_count() {
        let fc = FormatConverter::new(SampleFormat::S16);
        let input = [1.5f32, -2.0, 0.0, 32767.0, -40000.0];
        let mut out = Buffer::new();
        let clipped = fc.convert(&input, &mut out);

        let values: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![1, -2, 0, 32767, -32768]);
        assert_eq!(clipped, 2);
        assert_eq!(fc.clipped_counter().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_s16_representable_roundtrip() {
        // A value already representable without saturation converts
        // exactly.
        let fc = FormatConverter::new(SampleFormat::S16);
        let input = [12345.0f32, -32767.0, 32766.0];
        let mut out = Buffer::new();
        let clipped = fc.convert(&input, &mut out);
        let values: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![12345, -32767, 32766]);
        assert_eq!(clipped, 0);
    }

    #[test]
    fn test_u8_offset_binary() {
        let fc = FormatConverter::new(SampleFormat::U8);
        let input = [0.0f32, 100.0, -100.0, 200.0, -200.0];
        let mut out = Buffer::new();
        let clipped = fc.convert(&input, &mut out);
        assert_eq!(out.as_bytes(), &[128, 228, 28, 255, 0]);
        assert_eq!(clipped, 2);
    }

    #[test]
    fn test_s8_saturation() {
        let fc = FormatConverter::new(SampleFormat::S8);
        let input = [1.0f32, -1.0, 126.0, 128.5, -200.0];
        let mut out = Buffer::new();
        let clipped = fc.convert(&input, &mut out);
        assert_eq!(
            out.as_bytes(),
            &[1u8, (-1i8) as u8, 126, 127, (-128i8) as u8]
        );
        assert_eq!(clipped, 2);
    }

    #[test]
    fn test_complexf_passthrough() {
        let fc = FormatConverter::new(SampleFormat::ComplexF);
        let input = [0.25f32, -0.5, 1.0, -1.0];
        let mut out = Buffer::new();
        let clipped = fc.convert(&input, &mut out);
        assert_eq!(out.as_f32(), &input);
        assert_eq!(clipped, 0);
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(SampleFormat::ComplexF.size(), 8);
        assert_eq!(SampleFormat::S16.size(), 4);
        assert_eq!(SampleFormat::U8.size(), 2);
        assert_eq!(SampleFormat::S8.size(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_representable_s16_roundtrips(v in -32_766i16..=32_766) {
                let fc = FormatConverter::new(SampleFormat::S16);
                let mut out = Buffer::new();
                let clipped = fc.convert(&[v as f32], &mut out);
                let back = i16::from_le_bytes([out.as_bytes()[0], out.as_bytes()[1]]);
                prop_assert_eq!(back, v);
                prop_assert_eq!(clipped, 0);
            }

            #[test]
            fn prop_s8_never_exceeds_range(v in -1000.0f32..1000.0) {
                let fc = FormatConverter::new(SampleFormat::S8);
                let mut out = Buffer::new();
                fc.convert(&[v], &mut out);
                let back = out.as_bytes()[0] as i8;
                prop_assert!((-128..=127).contains(&(back as i32)));
            }
        }
    }
}

//! Convolutional time interleaver, depth 16.
//!
//! Bit i of the output frame comes from the input frame
//! `SCATTERING[i mod 16]` frames ago. During the first fifteen
//! frames the missing history reads as zero, which keeps the
//! indexing aligned for a receiver that discards the priming
//! interval.

use std::collections::VecDeque;

pub const DEPTH: usize = 16;

/// Per-bit frame delays within each 16-bit group.
pub const SCATTERING: [usize; DEPTH] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];

pub struct TimeInterleaver {
    /// history[0] is the current frame, history[d] is d frames old.
    history: VecDeque<Vec<u8>>,
}

impl TimeInterleaver {
    pub fn new() -> Self {
        TimeInterleaver {
            history: VecDeque::with_capacity(DEPTH),
        }
    }

    /// Interleave one frame of punctured bits. All frames of one
    /// sub-channel have the same length.
    pub fn interleave(&mut self, bits: Vec<u8>) -> Vec<u8> {
        let len = bits.len();
        self.history.push_front(bits);
        self.history.truncate(DEPTH);

        let mut out = vec![0u8; len];
        for (i, slot) in out.iter_mut().enumerate() {
            let delay = SCATTERING[i % DEPTH];
            if let Some(frame) = self.history.get(delay) {
                *slot = frame[i];
            }
        }
        out
    }
}

impl Default for TimeInterleaver {
    fn default() -> Self {
        TimeInterleaver::new()
    }
}

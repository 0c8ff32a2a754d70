//! FIC coding lane: energy dispersal, mother code and the
//! mode-specific FIC puncturing. The FIC is never time-interleaved.

use crate::coding::convolution::encode_mother;
use crate::coding::prbs::Prbs;
use crate::coding::puncturing::{puncture, ProtectionProfile, PuncturingRule};
use crate::coding::unpack_bits;

pub struct FicSource {
    mode: u8,
    profile: ProtectionProfile,
    prbs: Prbs,
    frame_data: Vec<u8>,
}

impl FicSource {
    pub fn new(mode: u8) -> Self {
        // TM I/II/IV carry one 768-bit FIB group per ETI frame, TM
        // III one 1024-bit group; both are punctured to rate 1/3.
        let rules = if mode == 3 {
            vec![
                PuncturingRule { blocks: 29, pi: 16 },
                PuncturingRule { blocks: 3, pi: 15 },
            ]
        } else {
            vec![
                PuncturingRule { blocks: 21, pi: 16 },
                PuncturingRule { blocks: 3, pi: 15 },
            ]
        };
        FicSource {
            mode,
            profile: ProtectionProfile {
                rules,
                bitrate_kbps: 0,
            },
            prbs: Prbs::new(),
            frame_data: Vec::new(),
        }
    }

    /// FIC bytes per ETI frame: 128 in TM III, 96 otherwise.
    pub fn framesize(&self) -> usize {
        if self.mode == 3 {
            128
        } else {
            96
        }
    }

    /// Coded FIC bits per ETI frame.
    pub fn coded_len(&self) -> usize {
        self.framesize() * 8 * 3
    }

    pub fn load(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), self.framesize());
        self.frame_data.clear();
        self.frame_data.extend_from_slice(data);
    }

    pub fn process(&mut self) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.frame_data);
        self.prbs.reset();
        self.prbs.scramble(&mut data);
        let mother = encode_mother(&unpack_bits(&data));
        puncture(&mother, &self.profile)
    }
}

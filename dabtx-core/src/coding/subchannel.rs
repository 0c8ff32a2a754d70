//! Per-sub-channel coding lane: energy dispersal, mother code,
//! puncturing and time interleaving.
//!
//! One source exists per STC entry; it is recreated when the STC
//! array changes. The interleaver history survives TPL-preserving
//! reloads of the same source.

use crate::coding::convolution::encode_mother;
use crate::coding::interleaver::TimeInterleaver;
use crate::coding::prbs::Prbs;
use crate::coding::puncturing::{profile_from_tpl, puncture, ProtectionProfile};
use crate::coding::unpack_bits;
use crate::errors::Result;
use crate::eti::EtiStc;

pub struct SubchannelSource {
    scid: u8,
    start_address: u16,
    stl: u16,
    profile: ProtectionProfile,
    prbs: Prbs,
    interleaver: TimeInterleaver,
    frame_data: Vec<u8>,
}

impl SubchannelSource {
    pub fn new(stc: &EtiStc) -> Result<Self> {
        let profile = profile_from_tpl(stc.tpl, stc.stl)?;
        Ok(SubchannelSource {
            scid: stc.scid,
            start_address: stc.start_address,
            stl: stc.stl,
            profile,
            prbs: Prbs::new(),
            interleaver: TimeInterleaver::new(),
            frame_data: Vec::new(),
        })
    }

    pub fn scid(&self) -> u8 {
        self.scid
    }

    /// Bytes consumed from each ETI frame: STL × 8.
    pub fn framesize(&self) -> usize {
        self.stl as usize * 8
    }

    /// First capacity unit of this sub-channel inside the CIF.
    pub fn start_address(&self) -> usize {
        self.start_address as usize
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.profile.bitrate_kbps
    }

    /// Occupied capacity units after coding.
    pub fn capacity_units(&self) -> usize {
        self.profile.capacity_units()
    }

    /// Update the puncturing profile when the TPL changed without a
    /// full STC rebuild.
    pub fn set_protection(&mut self, tpl: u8) -> Result<()> {
        self.profile = profile_from_tpl(tpl, self.stl)?;
        Ok(())
    }

    pub fn load(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), self.framesize());
        self.frame_data.clear();
        self.frame_data.extend_from_slice(data);
    }

    /// Run the loaded frame through the coding chain. The result
    /// has `punctured_bits` bits; the caller pads to the capacity
    /// unit boundary when packing the CIF.
    pub fn process(&mut self) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.frame_data);
        self.prbs.reset();
        self.prbs.scramble(&mut data);
        let mother = encode_mother(&unpack_bits(&data));
        let punctured = puncture(&mother, &self.profile);
        self.interleaver.interleave(punctured)
    }
}

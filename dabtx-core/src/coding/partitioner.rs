//! CIF assembly and transmission-frame collection.
//!
//! Every 24 ms ETI frame yields one Common Interleaved Frame of
//! 864 capacity units × 64 bits = 55 296 coded MSC bits, plus one
//! coded FIC block. A transmission frame spans 4/1/1/2 ETI frames
//! for TM I/II/III/IV; the partitioner concatenates the FIC blocks
//! and CIFs in that order, which is exactly the bit content of the
//! data symbols (everything after the phase reference symbol).

use crate::coding::fic::FicSource;
use crate::coding::subchannel::SubchannelSource;
use crate::ofdm::params::OfdmParams;

pub const CIF_BITS: usize = 55_296;
pub const CIF_CAPACITY_UNITS: usize = 864;
pub const CU_BITS: usize = 64;

/// Pack the coded sub-channel outputs into one CIF at their start
/// addresses. Unoccupied capacity units stay zero.
pub fn assemble_cif(subchannels: &mut [SubchannelSource]) -> Vec<u8> {
    let mut cif = vec![0u8; CIF_BITS];
    for source in subchannels {
        let offset = source.start_address() * CU_BITS;
        let bits = source.process();
        debug_assert!(offset + bits.len() <= CIF_BITS);
        cif[offset..offset + bits.len()].copy_from_slice(&bits);
    }
    cif
}

/// Collects per-ETI-frame coded data until a whole transmission
/// frame is available.
pub struct BlockPartitioner {
    frames_per_tx: usize,
    fic_blocks: Vec<Vec<u8>>,
    cifs: Vec<Vec<u8>>,
}

impl BlockPartitioner {
    pub fn new(params: &OfdmParams) -> Self {
        BlockPartitioner {
            frames_per_tx: params.frames_per_tx,
            fic_blocks: Vec::new(),
            cifs: Vec::new(),
        }
    }

    pub fn frames_per_tx(&self) -> usize {
        self.frames_per_tx
    }

    /// Number of ETI frames currently collected.
    pub fn pending(&self) -> usize {
        self.cifs.len()
    }

    /// Feed the coded output of one ETI frame. Returns the bit
    /// content of the data symbols once the transmission frame is
    /// complete, `None` while still collecting.
    pub fn partition(
        &mut self,
        fic: &mut FicSource,
        subchannels: &mut [SubchannelSource],
    ) -> Option<Vec<u8>> {
        self.fic_blocks.push(fic.process());
        self.cifs.push(assemble_cif(subchannels));

        if self.cifs.len() < self.frames_per_tx {
            return None;
        }

        let total: usize = self.fic_blocks.iter().map(Vec::len).sum::<usize>()
            + self.cifs.iter().map(Vec::len).sum::<usize>();
        let mut bits = Vec::with_capacity(total);
        for block in self.fic_blocks.drain(..) {
            bits.extend_from_slice(&block);
        }
        for cif in self.cifs.drain(..) {
            bits.extend_from_slice(&cif);
        }
        Some(bits)
    }

    /// Drop any partially collected transmission frame.
    pub fn reset(&mut self) {
        self.fic_blocks.clear();
        self.cifs.clear();
    }
}

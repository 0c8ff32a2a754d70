//! ETI (ETSI EN 300 799) frame parsing.
//!
//! The reader is a byte-level state machine driven strictly by
//! consuming the declared number of bytes per field:
//!
//! ```text
//! NbFrames -> FrameSize -> Sync -> FC -> NST -> EOH -> FIC
//!     -> Subch -> EOF -> TIST -> Pad -> Sync
//! ```
//!
//! On `Sync` the frame length is reset to the raw-ETI 6144 bytes and
//! `Pad` swallows the tail. Each completed frame leaves the FIC and
//! sub-channel sources loaded with fresh data and the timestamp
//! decoder updated from MNSC/TIST.

pub mod timestamp;

use std::sync::{Arc, Mutex};

use crate::coding::fic::FicSource;
use crate::coding::subchannel::SubchannelSource;
use crate::errors::{EtiError, Result};
use timestamp::TimestampDecoder;

/// The two alternating ETI sync words (ERR byte included), as they
/// appear little-endian at the start of a raw frame.
pub const ETI_SYNC_WORDS: [u32; 2] = [0x49C5_F8FF, 0xB63A_07FF];

pub const ETI_FRAME_LEN: usize = 6144;

/// Decoded FC field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtiFc {
    pub fct: u8,
    pub ficf: bool,
    pub nst: u8,
    pub fp: u8,
    pub mid: u8,
    pub fl: u16,
}

impl EtiFc {
    pub fn from_bytes(b: [u8; 4]) -> Self {
        EtiFc {
            fct: b[0],
            nst: b[1] & 0x7F,
            ficf: b[1] & 0x80 != 0,
            fl: (((b[2] & 0x07) as u16) << 8) | b[3] as u16,
            mid: (b[2] >> 3) & 0x03,
            fp: b[2] >> 5,
        }
    }

    /// Transmission mode 1..4; MID=0 encodes mode IV.
    pub fn mode(&self) -> u8 {
        if self.mid == 0 {
            4
        } else {
            self.mid
        }
    }
}

/// One sub-channel stream characterisation (STC) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtiStc {
    pub scid: u8,
    pub start_address: u16,
    pub tpl: u8,
    pub stl: u16,
    raw: [u8; 4],
}

impl EtiStc {
    pub fn from_bytes(b: [u8; 4]) -> Self {
        EtiStc {
            scid: b[0] >> 2,
            start_address: (((b[0] & 0x03) as u16) << 8) | b[1] as u16,
            tpl: b[2] >> 2,
            stl: (((b[2] & 0x03) as u16) << 8) | b[3] as u16,
            raw: b,
        }
    }

    pub fn raw(&self) -> [u8; 4] {
        self.raw
    }
}

/// Input wire format, see the reader states NbFrames/FrameSize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtiFraming {
    /// Concatenated 6144-byte frames.
    Raw,
    /// u16 length prefix per frame.
    Streamed,
    /// u32 frame count, then length-prefixed frames.
    Framed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NbFrames,
    FrameSize,
    Sync,
    Fc,
    Nst,
    Eoh,
    Fic,
    Subch(usize),
    Eof,
    Tist,
    Pad,
}

/// Parses ETI framing and feeds the coding sources and the
/// timestamp decoder. Partial input is retained across calls.
pub struct EtiReader {
    state: State,
    framing: EtiFraming,
    /// Bytes remaining until the end of the current 6144-byte frame.
    frame_remaining: usize,
    /// Field bytes collected so far for the state being parsed.
    pending: Vec<u8>,
    fc: Option<EtiFc>,
    stc: Vec<EtiStc>,
    fic_source: Option<FicSource>,
    subchannels: Vec<SubchannelSource>,
    decoder: Arc<Mutex<TimestampDecoder>>,
    /// MNSC word of the frame being parsed, held from EOH to TIST.
    pending_mnsc: u16,
    frames_complete: u64,
}

impl EtiReader {
    pub fn new(framing: EtiFraming, decoder: Arc<Mutex<TimestampDecoder>>) -> Self {
        let state = match framing {
            EtiFraming::Raw => State::Sync,
            EtiFraming::Streamed => State::FrameSize,
            EtiFraming::Framed => State::NbFrames,
        };
        EtiReader {
            state,
            framing,
            frame_remaining: 0,
            pending: Vec::with_capacity(ETI_FRAME_LEN),
            fc: None,
            stc: Vec::new(),
            fic_source: None,
            subchannels: Vec::new(),
            decoder,
            pending_mnsc: 0,
            frames_complete: 0,
        }
    }

    pub fn fc(&self) -> Option<&EtiFc> {
        self.fc.as_ref()
    }

    pub fn mode(&self) -> Option<u8> {
        self.fc.map(|fc| fc.mode())
    }

    pub fn fct(&self) -> Option<u8> {
        self.fc.map(|fc| fc.fct)
    }

    pub fn fic_source(&mut self) -> Option<&mut FicSource> {
        self.fic_source.as_mut()
    }

    pub fn subchannels(&mut self) -> &mut [SubchannelSource] {
        &mut self.subchannels
    }

    /// Both coding lanes at once, for the CIF partitioner.
    pub fn coding_sources(&mut self) -> (Option<&mut FicSource>, &mut [SubchannelSource]) {
        (self.fic_source.as_mut(), &mut self.subchannels)
    }

    pub fn stc(&self) -> &[EtiStc] {
        &self.stc
    }

    pub fn frames_complete(&self) -> u64 {
        self.frames_complete
    }

    pub fn decoder(&self) -> Arc<Mutex<TimestampDecoder>> {
        self.decoder.clone()
    }

    /// Consume `input` and return the number of bytes used. Returns
    /// `EtiError::InsufficientInput` when a full frame could not be
    /// completed; the internal state is kept and the next call
    /// resumes where this one stopped.
    pub fn process(&mut self, input: &[u8]) -> Result<usize> {
        let frames_before = self.frames_complete;
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                State::NbFrames => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    // The leading frame count only matters for
                    // seekable sources; it is consumed and dropped.
                    self.pending.clear();
                    self.state = State::FrameSize;
                }
                State::FrameSize => {
                    if !self.fill(input, &mut pos, 2) {
                        break;
                    }
                    self.pending.clear();
                    self.state = State::Sync;
                }
                State::Sync => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    let word = u32::from_le_bytes(self.take::<4>());
                    if !ETI_SYNC_WORDS.contains(&word) {
                        return Err(EtiError::MalformedFrame {
                            searched: ETI_FRAME_LEN,
                        }
                        .into());
                    }
                    self.frame_remaining = ETI_FRAME_LEN - 4;
                    self.state = State::Fc;
                }
                State::Fc => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    let fc = EtiFc::from_bytes(self.take::<4>());
                    self.frame_remaining -= 4;
                    if !fc.ficf {
                        return Err(EtiError::FicMissing.into());
                    }
                    let mode_changed = self.fc.map(|old| old.mode()) != Some(fc.mode());
                    if self.fic_source.is_none() || mode_changed {
                        self.fic_source = Some(FicSource::new(fc.mode()));
                    }
                    self.fc = Some(fc);
                    self.state = State::Nst;
                }
                State::Nst => {
                    let fc = self.fc.expect("FC parsed before NST");
                    let want = 4 * fc.nst as usize;
                    if !self.fill(input, &mut pos, want) {
                        break;
                    }
                    let raw = std::mem::take(&mut self.pending);
                    self.reprovision(&raw)?;
                    self.frame_remaining -= want;
                    self.state = State::Eoh;
                }
                State::Eoh => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    let b = self.take::<4>();
                    let mnsc = u16::from_le_bytes([b[0], b[1]]);
                    // CRC in b[2..4] is not checked here.
                    self.frame_remaining -= 4;
                    self.pending_mnsc = mnsc;
                    self.state = State::Fic;
                }
                State::Fic => {
                    let fic = self.fic_source.as_mut().expect("created in FC state");
                    let want = fic.framesize();
                    if !self.fill(input, &mut pos, want) {
                        break;
                    }
                    let data = std::mem::take(&mut self.pending);
                    self.fic_source
                        .as_mut()
                        .expect("created in FC state")
                        .load(&data);
                    self.frame_remaining -= want;
                    self.state = State::Subch(0);
                }
                State::Subch(i) => {
                    if i >= self.subchannels.len() {
                        self.state = State::Eof;
                        continue;
                    }
                    let want = self.subchannels[i].framesize();
                    if !self.fill(input, &mut pos, want) {
                        break;
                    }
                    let data = std::mem::take(&mut self.pending);
                    self.subchannels[i].load(&data);
                    self.frame_remaining -= want;
                    self.state = State::Subch(i + 1);
                }
                State::Eof => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    self.pending.clear();
                    self.frame_remaining -= 4;
                    self.state = State::Tist;
                }
                State::Tist => {
                    if !self.fill(input, &mut pos, 4) {
                        break;
                    }
                    let b = self.take::<4>();
                    let tist = u32::from_le_bytes(b) & 0x00FF_FFFF;
                    self.frame_remaining -= 4;
                    let fc = self.fc.expect("FC parsed before TIST");
                    self.decoder.lock().unwrap().update_eti(
                        fc.fct & 0x3,
                        self.pending_mnsc,
                        tist,
                        fc.fct,
                    );
                    self.state = State::Pad;
                    // A maximally filled frame has no pad at all.
                    if self.frame_remaining == 0 {
                        self.frame_complete();
                    }
                }
                State::Pad => {
                    if self.frame_remaining == 0 {
                        self.frame_complete();
                        continue;
                    }
                    let take = self.frame_remaining.min(input.len() - pos);
                    pos += take;
                    self.frame_remaining -= take;
                    if self.frame_remaining == 0 {
                        self.frame_complete();
                    }
                }
            }
        }

        if self.frames_complete == frames_before && pos == input.len() {
            // All bytes consumed without finishing a frame: the
            // caller has to supply more.
            if self.state != State::Pad || self.frame_remaining > 0 {
                return Err(EtiError::InsufficientInput.into());
            }
        }
        Ok(pos)
    }

    fn frame_complete(&mut self) {
        self.frames_complete += 1;
        self.state = match self.framing {
            EtiFraming::Raw => State::Sync,
            EtiFraming::Streamed | EtiFraming::Framed => State::FrameSize,
        };
    }

    /// Collect up to `want` bytes into `pending`; true when full.
    fn fill(&mut self, input: &[u8], pos: &mut usize, want: usize) -> bool {
        let missing = want.saturating_sub(self.pending.len());
        let take = missing.min(input.len() - *pos);
        self.pending.extend_from_slice(&input[*pos..*pos + take]);
        *pos += take;
        self.pending.len() >= want
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.pending[..N]);
        self.pending.clear();
        out
    }

    /// Rebuild sub-channel sources when the STC array changed
    /// byte-wise; otherwise the cached ones (and their interleaver
    /// history) are reused.
    fn reprovision(&mut self, raw: &[u8]) -> Result<()> {
        let same = self.stc.len() * 4 == raw.len()
            && self
                .stc
                .iter()
                .zip(raw.chunks_exact(4))
                .all(|(old, new)| old.raw() == new);
        if same {
            return Ok(());
        }
        self.stc = raw
            .chunks_exact(4)
            .map(|c| EtiStc::from_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.subchannels = self
            .stc
            .iter()
            .map(SubchannelSource::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eti::timestamp::encode_mnsc;

    pub(crate) fn build_raw_frame(
        fct: u8,
        mode: u8,
        stc: &[(u8, u16, u8, u16)],
        mnsc: u16,
        tist: u32,
    ) -> Vec<u8> {
        let mut f = Vec::with_capacity(ETI_FRAME_LEN);
        let sync = if fct % 2 == 0 {
            ETI_SYNC_WORDS[0]
        } else {
            ETI_SYNC_WORDS[1]
        };
        f.extend_from_slice(&sync.to_le_bytes());
        let mid = if mode == 4 { 0 } else { mode };
        let nst = stc.len() as u8;
        f.push(fct);
        f.push(0x80 | nst);
        f.push((fct % 8) << 5 | mid << 3);
        f.push(0x00);
        for &(scid, sad, tpl, stl) in stc {
            f.push(scid << 2 | (sad >> 8) as u8);
            f.push((sad & 0xFF) as u8);
            f.push(tpl << 2 | (stl >> 8) as u8);
            f.push((stl & 0xFF) as u8);
        }
        f.extend_from_slice(&mnsc.to_le_bytes());
        f.extend_from_slice(&[0u8; 2]); // EOH CRC
        let fic_len = if mode == 3 { 128 } else { 96 };
        f.extend(std::iter::repeat(0u8).take(fic_len));
        for &(_, _, _, stl) in stc {
            f.extend(std::iter::repeat(0u8).take(stl as usize * 8));
        }
        f.extend_from_slice(&[0u8; 4]); // EOF
        f.extend_from_slice(&tist.to_le_bytes());
        f.resize(ETI_FRAME_LEN, 0x55);
        f
    }

    fn reader() -> EtiReader {
        EtiReader::new(
            EtiFraming::Raw,
            Arc::new(Mutex::new(TimestampDecoder::new(0.0))),
        )
    }

    #[test]
    fn test_fc_field_decoding() {
        let fc = EtiFc::from_bytes([7, 0x82, 0b0100_1001, 0x23]);
        assert_eq!(fc.fct, 7);
        assert!(fc.ficf);
        assert_eq!(fc.nst, 2);
        assert_eq!(fc.fp, 0b010);
        assert_eq!(fc.mid, 0b01);
        assert_eq!(fc.fl, 0x123);
    }

    #[test]
    fn test_stc_field_decoding() {
        let stc = EtiStc::from_bytes([0b000101_10, 0x40, 0b100010_01, 0x30]);
        assert_eq!(stc.scid, 0b000101);
        assert_eq!(stc.start_address, 0x240);
        assert_eq!(stc.tpl, 0b100010);
        assert_eq!(stc.stl, 0x130);
    }

    #[test]
    fn test_empty_frame_parses() {
        let frame = build_raw_frame(0, 1, &[], 0, 0);
        let mut r = reader();
        let used = r.process(&frame).unwrap();
        assert_eq!(used, ETI_FRAME_LEN);
        assert_eq!(r.frames_complete(), 1);
        assert_eq!(r.mode(), Some(1));
        assert_eq!(r.fct(), Some(0));
    }

    #[test]
    fn test_partial_input_resumes() {
        let frame = build_raw_frame(3, 2, &[], 0, 1234);
        let mut r = reader();
        let err = r.process(&frame[..100]).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::ModError::Eti(EtiError::InsufficientInput)
        ));
        r.process(&frame[100..]).unwrap();
        assert_eq!(r.frames_complete(), 1);
    }

    #[test]
    fn test_ficf_zero_is_fatal() {
        let mut frame = build_raw_frame(0, 1, &[], 0, 0);
        frame[5] &= 0x7F; // clear FICF
        let mut r = reader();
        assert!(matches!(
            r.process(&frame).unwrap_err(),
            crate::errors::ModError::Eti(EtiError::FicMissing)
        ));
    }

    #[test]
    fn test_bad_sync_is_malformed() {
        let mut frame = build_raw_frame(0, 1, &[], 0, 0);
        frame[3] ^= 0xFF;
        let mut r = reader();
        assert!(matches!(
            r.process(&frame).unwrap_err(),
            crate::errors::ModError::Eti(EtiError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_fic_length_depends_on_mode() {
        let mut r = reader();
        let frame = build_raw_frame(0, 3, &[], 0, 0);
        r.process(&frame).unwrap();
        assert_eq!(r.fic_source().unwrap().framesize(), 128);

        let mut r = reader();
        let frame = build_raw_frame(0, 1, &[], 0, 0);
        r.process(&frame).unwrap();
        assert_eq!(r.fic_source().unwrap().framesize(), 96);
    }

    #[test]
    fn test_subchannel_reprovisioning_on_stc_change() {
        // EEP 3-A at 24 kbit/s: TPL long form, option 0, level 3.
        let tpl = 0b100010;
        let mut r = reader();
        let f1 = build_raw_frame(0, 1, &[(1, 0, tpl, 9)], 0, 0);
        r.process(&f1).unwrap();
        assert_eq!(r.subchannels().len(), 1);
        let f2 = build_raw_frame(1, 1, &[(1, 0, tpl, 9), (2, 100, tpl, 9)], 0, 0);
        r.process(&f2).unwrap();
        assert_eq!(r.subchannels().len(), 2);
    }

    #[test]
    fn test_timestamp_reaches_decoder() {
        let decoder = Arc::new(Mutex::new(TimestampDecoder::new(0.0)));
        let mut r = EtiReader::new(EtiFraming::Raw, decoder.clone());
        let words = encode_mnsc(24, 1, 1, 12, 0, 0);
        for fct in 0..4u8 {
            let frame =
                build_raw_frame(fct, 1, &[], words[fct as usize], fct as u32 * 393_216);
            r.process(&frame).unwrap();
        }
        let ts = decoder.lock().unwrap().timestamp();
        assert!(ts.valid);
        assert_eq!(ts.utc_seconds, 1_704_110_400); // 2024-01-01T12:00:00Z
    }
}

//! ETI input transports.
//!
//! Three wire forms are autodetected by scanning up to one frame
//! length for a sync pattern: raw (concatenated 6144-byte frames),
//! streamed (u16 length prefix per frame) and framed (u32 frame
//! count, then length-prefixed frames). Every reader delivers full
//! 6144-byte frames, short ones padded with 0x55 like the tail of a
//! raw frame.

pub mod edi;
pub mod file;
pub mod tcp;

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::eti::{EtiFraming, ETI_FRAME_LEN, ETI_SYNC_WORDS};
use crate::flowgraph::{FrameMetadata, ModInput};

fn is_sync(word: u32) -> bool {
    ETI_SYNC_WORDS.contains(&word)
}

fn word_at(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Where the detected stream starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFormat {
    pub framing: EtiFraming,
    /// Bytes to skip before the first frame (junk before the first
    /// raw sync, or the framed-stream header).
    pub offset: usize,
}

/// Detect the wire form from the first bytes of a stream. Needs up
/// to 6144 + 10 bytes to scan; fewer are acceptable if a pattern is
/// found early.
pub fn detect_format(head: &[u8]) -> Option<DetectedFormat> {
    // Raw: sync right at the start.
    if word_at(head, 0).map(is_sync) == Some(true) {
        return Some(DetectedFormat {
            framing: EtiFraming::Raw,
            offset: 0,
        });
    }
    // Streamed: u16 length, then a frame starting with sync.
    if word_at(head, 2).map(is_sync) == Some(true) {
        return Some(DetectedFormat {
            framing: EtiFraming::Streamed,
            offset: 0,
        });
    }
    // Framed: u32 frame count, u16 length, then sync.
    if word_at(head, 6).map(is_sync) == Some(true) {
        return Some(DetectedFormat {
            framing: EtiFraming::Framed,
            offset: 4,
        });
    }
    // Raw with leading junk: scan byte-wise for a sync pattern.
    for offset in 1..head.len().saturating_sub(4).min(ETI_FRAME_LEN + 10) {
        if word_at(head, offset).map(is_sync) == Some(true) {
            return Some(DetectedFormat {
                framing: EtiFraming::Raw,
                offset,
            });
        }
    }
    None
}

/// A transport delivering padded 6144-byte ETI frames.
pub trait InputReader: Send {
    fn name(&self) -> &str;

    /// Fill `frame` with one padded ETI frame. Returns false on a
    /// clean end of stream.
    fn read_frame(&mut self, frame: &mut [u8; ETI_FRAME_LEN]) -> Result<bool>;

    /// Timestamp of the frame just read, for sources that carry it
    /// out of band (EDI).
    fn frame_metadata(&mut self) -> Vec<FrameMetadata> {
        Vec::new()
    }
}

/// Adapts an [`InputReader`] to the flowgraph input stage contract.
pub struct InputStage {
    reader: Box<dyn InputReader>,
    scratch: [u8; ETI_FRAME_LEN],
    meta: Vec<FrameMetadata>,
}

impl InputStage {
    pub fn new(reader: Box<dyn InputReader>) -> Self {
        InputStage {
            reader,
            scratch: [0u8; ETI_FRAME_LEN],
            meta: Vec::new(),
        }
    }
}

impl ModInput for InputStage {
    fn name(&self) -> &str {
        self.reader.name()
    }

    fn process(&mut self, out: &mut Buffer) -> Result<usize> {
        if !self.reader.read_frame(&mut self.scratch)? {
            return Ok(0);
        }
        self.meta = self.reader.frame_metadata();
        out.set_bytes(&self.scratch);
        Ok(out.len())
    }

    fn metadata(&mut self) -> Vec<FrameMetadata> {
        std::mem::take(&mut self.meta)
    }
}

/// Read length-prefixed or raw frames from a byte stream and pad
/// them; shared by the file and TCP transports.
pub(crate) fn read_padded_frame<R: std::io::Read>(
    source: &mut R,
    framing: EtiFraming,
    frame: &mut [u8; ETI_FRAME_LEN],
) -> std::io::Result<bool> {
    use std::io::ErrorKind;

    let frame_len = match framing {
        EtiFraming::Raw => ETI_FRAME_LEN,
        EtiFraming::Streamed | EtiFraming::Framed => {
            let mut len_bytes = [0u8; 2];
            match source.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(e),
            }
            u16::from_le_bytes(len_bytes) as usize
        }
    };
    let frame_len = frame_len.min(ETI_FRAME_LEN);
    if frame_len == 0 {
        return Ok(false);
    }

    match source.read_exact(&mut frame[..frame_len]) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
        Err(e) => return Err(e),
    }
    frame[frame_len..].fill(0x55);
    Ok(true)
}

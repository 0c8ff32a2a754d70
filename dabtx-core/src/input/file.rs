//! Seekable ETI file input with optional loop-at-EOF.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::errors::{EtiError, Result};
use crate::eti::{EtiFraming, ETI_FRAME_LEN};
use crate::input::{detect_format, read_padded_frame, InputReader};

pub struct FileReader {
    name: String,
    source: BufReader<File>,
    framing: EtiFraming,
    /// Start of the first frame (after junk or the framed header).
    data_start: u64,
    loop_at_eof: bool,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>, loop_at_eof: bool) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut source = BufReader::new(file);

        let mut head = vec![0u8; ETI_FRAME_LEN + 10];
        let got = read_up_to(&mut source, &mut head)?;
        head.truncate(got);
        let detected = detect_format(&head).ok_or(EtiError::MalformedFrame {
            searched: got,
        })?;

        source.seek(SeekFrom::Start(detected.offset as u64))?;
        Ok(FileReader {
            name: format!("InputFile({})", path.as_ref().display()),
            source,
            framing: detected.framing,
            data_start: detected.offset as u64,
            loop_at_eof,
        })
    }

    pub fn framing(&self) -> EtiFraming {
        self.framing
    }
}

fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        let n = source.read(&mut buf[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    Ok(got)
}

impl InputReader for FileReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self, frame: &mut [u8; ETI_FRAME_LEN]) -> Result<bool> {
        if read_padded_frame(&mut self.source, self.framing, frame)? {
            return Ok(true);
        }
        if !self.loop_at_eof {
            return Ok(false);
        }
        self.source.seek(SeekFrom::Start(self.data_start))?;
        Ok(read_padded_frame(&mut self.source, self.framing, frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eti::ETI_SYNC_WORDS;

    fn write_raw_file(frames: usize) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("dabtx_input_test_{}.eti", frames));
        let mut data = Vec::new();
        for i in 0..frames {
            let mut frame = vec![i as u8; ETI_FRAME_LEN];
            frame[..4].copy_from_slice(&ETI_SYNC_WORDS[i % 2].to_le_bytes());
            data.extend_from_slice(&frame);
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_raw_file_reads_frames_then_eof() {
        let path = write_raw_file(2);
        let mut reader = FileReader::open(&path, false).unwrap();
        assert_eq!(reader.framing(), EtiFraming::Raw);
        let mut frame = [0u8; ETI_FRAME_LEN];
        assert!(reader.read_frame(&mut frame).unwrap());
        assert!(reader.read_frame(&mut frame).unwrap());
        assert_eq!(frame[100], 1);
        assert!(!reader.read_frame(&mut frame).unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_loop_at_eof_rewinds() {
        let path = write_raw_file(1);
        let mut reader = FileReader::open(&path, true).unwrap();
        let mut frame = [0u8; ETI_FRAME_LEN];
        for _ in 0..5 {
            assert!(reader.read_frame(&mut frame).unwrap());
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_garbage_file_rejected() {
        let path = std::env::temp_dir().join("dabtx_input_garbage.eti");
        std::fs::write(&path, vec![0x11u8; 8000]).unwrap();
        assert!(FileReader::open(&path, false).is_err());
        std::fs::remove_file(&path).ok();
    }
}

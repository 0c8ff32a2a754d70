//! File output stage, for running the modulator without SDR
//! hardware.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::flowgraph::{FrameMetadata, ModOutput};

pub struct OutputFile {
    name: String,
    sink: BufWriter<File>,
    frames_written: u64,
}

impl OutputFile {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(OutputFile {
            name: format!("OutputFile({})", path.as_ref().display()),
            sink: BufWriter::new(file),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl ModOutput for OutputFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, input: &Buffer, _meta: &[FrameMetadata]) -> Result<usize> {
        if input.is_empty() {
            return Ok(0);
        }
        self.sink.write_all(input.as_bytes())?;
        self.frames_written += 1;
        Ok(input.len())
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        let _ = self.sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_frames_skips_empties() {
        let path = std::env::temp_dir().join("dabtx_output_test.iq");
        {
            let mut out = OutputFile::create(&path).unwrap();
            out.process(&Buffer::from_bytes(&[1, 2, 3, 4]), &[]).unwrap();
            out.process(&Buffer::new(), &[]).unwrap();
            out.process(&Buffer::from_bytes(&[5, 6]), &[]).unwrap();
            assert_eq!(out.frames_written(), 2);
        }
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5, 6]);
        std::fs::remove_file(&path).ok();
    }
}

//! TCP client transport for `tcp://host:port` ETI sources.
//!
//! Connection losses are recovered by reconnecting with a one
//! second back-off; the wire form is re-detected after every
//! reconnect, since the multiplexer may have restarted with a
//! different framing.

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use crate::errors::Result;
use crate::eti::{EtiFraming, ETI_FRAME_LEN};
use crate::input::{detect_format, read_padded_frame, InputReader};
use crate::log::Logger;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub struct TcpReader {
    name: String,
    address: String,
    logger: Logger,
    connection: Option<Connection>,
}

struct Connection {
    stream: TcpStream,
    framing: EtiFraming,
    /// Head bytes consumed during detection, replayed before the
    /// socket.
    replay: Vec<u8>,
    replay_pos: usize,
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.replay_pos < self.replay.len() {
            let n = (self.replay.len() - self.replay_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.replay[self.replay_pos..self.replay_pos + n]);
            self.replay_pos += n;
            return Ok(n);
        }
        self.stream.read(buf)
    }
}

impl TcpReader {
    /// `address` is `host:port`, the `tcp://` scheme already
    /// stripped by the caller.
    pub fn new(address: &str, logger: Logger) -> Self {
        TcpReader {
            name: format!("InputTcp({})", address),
            address: address.to_string(),
            logger,
            connection: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        loop {
            match TcpStream::connect(&self.address) {
                Ok(mut stream) => {
                    let mut head = vec![0u8; ETI_FRAME_LEN + 10];
                    let mut got = 0;
                    while got < head.len() {
                        match stream.read(&mut head[got..]) {
                            Ok(0) => break,
                            Ok(n) => got += n,
                            Err(e) => {
                                self.logger.warn(
                                    "TCP",
                                    format!("read during detection failed: {}", e),
                                );
                                break;
                            }
                        }
                    }
                    head.truncate(got);
                    match detect_format(&head) {
                        Some(detected) => {
                            self.connection = Some(Connection {
                                stream,
                                framing: detected.framing,
                                replay: head,
                                replay_pos: detected.offset,
                            });
                            return Ok(());
                        }
                        None => {
                            self.logger.warn("TCP", "no ETI sync found, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    self.logger
                        .info("TCP", format!("connect to {} failed: {}", self.address, e));
                }
            }
            std::thread::sleep(RECONNECT_BACKOFF);
        }
    }
}

impl InputReader for TcpReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self, frame: &mut [u8; ETI_FRAME_LEN]) -> Result<bool> {
        loop {
            if self.connection.is_none() {
                self.connect()?;
            }
            let conn = self.connection.as_mut().expect("connected above");
            let framing = conn.framing;
            match read_padded_frame(conn, framing, frame) {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    self.logger.info("TCP", "connection closed, reconnecting");
                    self.connection = None;
                }
                Err(e) => {
                    self.logger.warn("TCP", format!("receive failed: {}", e));
                    self.connection = None;
                }
            }
            std::thread::sleep(RECONNECT_BACKOFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eti::ETI_SYNC_WORDS;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_reads_raw_frames_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            for i in 0..3u8 {
                let mut frame = vec![i; ETI_FRAME_LEN];
                frame[..4].copy_from_slice(&ETI_SYNC_WORDS[(i % 2) as usize].to_le_bytes());
                socket.write_all(&frame).unwrap();
            }
        });

        let mut reader = TcpReader::new(&addr.to_string(), Logger::disabled());
        let mut frame = [0u8; ETI_FRAME_LEN];
        for i in 0..3u8 {
            assert!(reader.read_frame(&mut frame).unwrap());
            assert_eq!(frame[200], i);
        }
        server.join().unwrap();
    }
}

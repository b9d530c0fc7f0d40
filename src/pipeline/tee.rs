//! Fan-out of one byte stream to two readers.
//!
//! Every chunk read from the source is handed to both consumers through a
//! bounded channel, so a slow consumer blocks the producer instead of data
//! being buffered without limit or dropped.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks in flight per consumer before the producer blocks.
const DEPTH: usize = 4;

type Chunk = Arc<[u8]>;

/// Producer side of a [split].
pub struct TeeWriter {
    outputs: [SyncSender<Chunk>; 2],
}

/// Consumer side of a [split], yielding every byte the producer pumped.
pub struct TeeReader {
    input: Receiver<Chunk>,
    chunk: Chunk,
    pos: usize,
}

/// Creates a producer and its two consumers.
pub fn split() -> (TeeWriter, TeeReader, TeeReader) {
    let (left_tx, left_rx) = mpsc::sync_channel(DEPTH);
    let (right_tx, right_rx) = mpsc::sync_channel(DEPTH);

    let writer = TeeWriter {
        outputs: [left_tx, right_tx],
    };
    (writer, TeeReader::new(left_rx), TeeReader::new(right_rx))
}

impl TeeWriter {
    /// Copies `source` to both consumers until EOF and returns the byte count.
    ///
    /// Fails with [io::ErrorKind::BrokenPipe] if a consumer went away before
    /// the stream ended. Consumers see EOF once this returns.
    pub fn pump(self, source: &mut dyn Read) -> io::Result<u64> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let chunk: Chunk = Arc::from(&buf[..n]);
            for output in &self.outputs {
                output.send(Arc::clone(&chunk)).map_err(|_| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "dump consumer went away")
                })?;
            }
            total += n as u64;
        }
    }
}

impl TeeReader {
    fn new(input: Receiver<Chunk>) -> Self {
        Self {
            input,
            chunk: Arc::from(Vec::new()),
            pos: 0,
        }
    }
}

impl Read for TeeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.input.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // producer finished or gave up
                Err(_) => return Ok(0),
            }
        }

        let available = &self.chunk[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

// LINE FRAMER
// OWNS A GROWABLE BYTE BUFFER FED BY NON-BLOCKING READS AND HANDS OUT
// COMPLETE '\n'-TERMINATED LINES. A PARTIAL TRAILING LINE STAYS BUFFERED
// UNTIL THE NEXT READ COMPLETES IT (OR END OF STREAM FLUSHES IT).

use std::io::{self, ErrorKind, Read};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    // START OF THE FIRST UNCONSUMED BYTE
    start: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes: usize,
    pub eof: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    // READ EVERYTHING AVAILABLE NOW. STOPS AT WouldBlock OR END OF STREAM.
    pub fn fill_from<R: Read>(&mut self, src: &mut R) -> io::Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            match src.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome { bytes: total, eof: true }),
                Ok(n) => {
                    self.extend(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome { bytes: total, eof: false });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    // NEXT COMPLETE LINE WITHOUT ITS DELIMITER
    pub fn next_line(&mut self) -> Option<String> {
        let pending = &self.buf[self.start..];
        let nl = pending.iter().position(|&b| b == b'\n')?;
        let line = String::from_utf8_lossy(&pending[..nl]).into_owned();
        self.start += nl + 1;
        Some(line)
    }

    // UNTERMINATED REMAINDER, FOR END OF STREAM
    pub fn take_partial(&mut self) -> Option<String> {
        if self.start >= self.buf.len() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf[self.start..]).into_owned();
        self.buf.clear();
        self.start = 0;
        Some(line)
    }

    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

// DRAINS COMPLETE LINES. DROPPING IT EARLY LEAVES THE REST BUFFERED.
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

//! Intel HEX line source.
//!
//! The protocol engine treats each HEX record as opaque bytes; this module
//! only splits a stream into lines, terminator included, exactly as they
//! will go out on the bus. Record validation happens on the receiving
//! bootloader, not here.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::protocol::BLANK_LINE_MAX_LEN;

/// Whether a line carries no record payload and must never be transmitted.
#[inline]
pub fn is_blank_line(line: &[u8]) -> bool {
    line.len() <= BLANK_LINE_MAX_LEN
}

/// Lazy, finite, non-restartable sequence of HEX lines.
///
/// Yields one `Vec<u8>` per line with the terminator preserved verbatim;
/// the final line is yielded even without a trailing newline.
pub struct HexLines<R> {
    reader: R,
}

impl HexLines<BufReader<File>> {
    /// Open a HEX file as a line source.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> HexLines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> Iterator for HexLines<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    }
}

//! Deterministic gzip.
//!
//! The gzip header can carry the original file name and a modification time;
//! `gzip -n` leaves both out. We do the same through [`GzBuilder`], so the
//! compressed bytes depend only on the tar bytes and the compression level.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};

pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: Compression,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl Compressor {
    /// `level` is clamped to gzip's 0..=9 range.
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }

    /// Wraps `out` in an encoder with no file name and a zero mtime.
    pub fn writer<W: Write>(&self, out: W) -> GzEncoder<W> {
        GzBuilder::new().mtime(0).write(out, self.level)
    }

    /// Compresses everything readable from `input` into `out`.
    pub fn compress<R: io::Read, W: Write>(&self, mut input: R, out: W) -> io::Result<W> {
        let mut encoder = self.writer(out);
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()
    }
}

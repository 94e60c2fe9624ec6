//! Block-level access to tar streams.
//!
//! A tar archive is a sequence of 512-byte blocks: one header block per entry,
//! followed by the entry payload padded to a block boundary, and terminated by
//! two all-zero blocks. Writers usually pad the whole stream to a record of
//! 20 blocks.
//!
//! [`BlockReader`] walks that structure without interpreting entries beyond
//! what is needed to find the next header, so both the combiner and the
//! normalizer can copy payload bytes through untouched while holding a single
//! block in memory.

use std::io::{self, Read, Write};

use tar_rs as tar;
use thiserror::Error;

pub const BLOCK_SIZE: u64 = 512;
pub const RECORD_SIZE: u64 = BLOCK_SIZE * 20;

const CKSUM_RANGE: std::ops::Range<usize> = 148..156;

#[derive(Debug, Error)]
pub enum TarFormatError {
    #[error("tar stream truncated at byte {offset}")]
    Truncated { offset: u64 },

    #[error("bad header checksum at byte {offset}: stored {stored:o}, computed {computed:o}")]
    BadChecksum {
        offset: u64,
        stored: u32,
        computed: u32,
    },

    #[error("invalid header at byte {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("data found after a zero block at byte {offset}")]
    MisplacedEndMarker { offset: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Rounds `len` up to the next multiple of `unit`.
pub fn padded_len(len: u64, unit: u64) -> u64 {
    len.div_ceil(unit) * unit
}

/// Sum of all header bytes with the checksum field read as spaces.
pub fn header_checksum(block: &[u8; 512]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CKSUM_RANGE.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum()
}

/// Writes the two zero blocks that close an archive plus the padding that
/// brings a stream of `written` bytes up to a full record. Returns the number
/// of bytes written.
pub fn write_end_of_archive<W: Write>(out: &mut W, written: u64) -> io::Result<u64> {
    let end = written + 2 * BLOCK_SIZE;
    let total = padded_len(end, RECORD_SIZE) - written;
    io::copy(&mut io::repeat(0).take(total), out)?;
    Ok(total)
}

/// Header of one entry, positioned within its source stream.
pub struct RawEntry {
    pub header: tar::Header,
    pub offset: u64,
}

impl RawEntry {
    pub fn entry_type(&self) -> tar::EntryType {
        self.header.entry_type()
    }

    pub fn invalid(&self, reason: impl ToString) -> TarFormatError {
        TarFormatError::InvalidHeader {
            offset: self.offset,
            reason: reason.to_string(),
        }
    }
}

pub struct BlockReader<R> {
    inner: R,
    offset: u64,
    pending: u64,
    data_end: Option<u64>,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            pending: 0,
            data_end: None,
        }
    }

    /// Offset at which the end-of-archive marker starts, once it has been read.
    pub fn data_end(&self) -> Option<u64> {
        self.data_end
    }

    /// Advances to the next entry header, skipping any unread payload of the
    /// previous one. Returns `None` at the end-of-archive marker.
    pub fn next_entry(&mut self) -> Result<Option<RawEntry>, TarFormatError> {
        if self.data_end.is_some() {
            return Ok(None);
        }
        if self.pending > 0 {
            self.skip_payload()?;
        }

        let offset = self.offset;
        let mut block = [0u8; 512];
        self.read_block(&mut block)?;

        if block.iter().all(|b| *b == 0) {
            let second = self.offset;
            self.read_block(&mut block)?;
            if block.iter().any(|b| *b != 0) {
                return Err(TarFormatError::MisplacedEndMarker { offset: second });
            }
            self.data_end = Some(offset);
            return Ok(None);
        }

        let header = tar::Header::from_byte_slice(&block).clone();
        let stored = header.cksum().map_err(|e| TarFormatError::InvalidHeader {
            offset,
            reason: e.to_string(),
        })?;
        let computed = header_checksum(&block);
        if stored != computed {
            return Err(TarFormatError::BadChecksum {
                offset,
                stored,
                computed,
            });
        }

        let size = header
            .entry_size()
            .map_err(|e| TarFormatError::InvalidHeader {
                offset,
                reason: e.to_string(),
            })?;
        self.pending = padded_len(size, BLOCK_SIZE);

        Ok(Some(RawEntry { header, offset }))
    }

    /// Copies the current entry's payload, block padding included, into `out`.
    pub fn copy_payload<W: Write>(&mut self, out: &mut W) -> Result<u64, TarFormatError> {
        let expected = self.pending;
        let copied = io::copy(&mut (&mut self.inner).take(expected), out)?;
        self.offset += copied;
        self.pending = 0;
        if copied < expected {
            return Err(TarFormatError::Truncated {
                offset: self.offset,
            });
        }
        Ok(copied)
    }

    pub fn skip_payload(&mut self) -> Result<u64, TarFormatError> {
        self.copy_payload(&mut io::sink())
    }

    fn read_block(&mut self, block: &mut [u8; 512]) -> Result<(), TarFormatError> {
        let mut filled = 0;
        while filled < block.len() {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;
        if filled < block.len() {
            return Err(TarFormatError::Truncated {
                offset: self.offset,
            });
        }
        Ok(())
    }
}

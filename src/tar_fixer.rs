//! Canonical rewriting of tar headers.
//!
//! `git archive` stamps entries with the current time when it is given a tree
//! rather than a commit, and every tar implementation fills owner fields and
//! numeric formatting a little differently. [`TarFixer`] streams a tar archive
//! block by block and rewrites every header so the output depends only on:
//!
//! - entry names, link targets, types, sizes and payloads (copied verbatim),
//! - the commit timestamp (every `mtime`),
//! - the commit id (recorded once in a pax global header).
//!
//! Owner ids become `0`, owner names become `root`, and every header is
//! re-encoded as POSIX ustar with zero-padded octal fields. Global headers in
//! the input are dropped and replaced by a single synthesized one at the start.
//! Per-entry pax headers keep their `path`/`linkpath` records but lose any
//! owner or time records, which readers would otherwise prefer over the
//! rewritten ustar fields.
//! Running the fixer over its own output reproduces it byte for byte.

use std::io::{self, Read, Write};

use log::{debug, trace};
use tar_rs as tar;

use crate::tar_stream::{
    padded_len, write_end_of_archive, BlockReader, RawEntry, TarFormatError, BLOCK_SIZE,
};

pub const CANONICAL_OWNER: &str = "root";
pub const GLOBAL_HEADER_NAME: &str = "pax_global_header";

/// pax keys that override header fields the fixer canonicalizes.
const HOST_PAX_KEYS: &[&str] = &[
    "atime",
    "ctime",
    "mtime",
    "uid",
    "gid",
    "uname",
    "gname",
    "SCHILY.dev",
    "SCHILY.ino",
    "SCHILY.nlink",
    "LIBARCHIVE.creationtime",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixStats {
    /// Entries copied to the output, not counting the synthesized global header.
    pub entries: u64,
    /// Global headers found in the input and dropped.
    pub dropped_global_headers: u64,
    /// Total bytes written, end-of-archive padding included.
    pub bytes_written: u64,
}

pub struct TarFixer<R, W> {
    reader: BlockReader<R>,
    out: W,
    timestamp: u64,
    gitref: String,
    stats: FixStats,
}

impl<R: Read, W: Write> TarFixer<R, W> {
    pub fn new(input: R, out: W, timestamp: u64, gitref: &str) -> Self {
        Self {
            reader: BlockReader::new(input),
            out,
            timestamp,
            gitref: gitref.to_string(),
            stats: FixStats::default(),
        }
    }

    /// Rewrites the whole stream and hands back the sink.
    pub fn fix(mut self) -> Result<(W, FixStats), TarFormatError> {
        self.write_global_header()?;

        while let Some(entry) = self.reader.next_entry()? {
            if entry.entry_type().is_pax_global_extensions() {
                trace!("Dropping global header at byte {}", entry.offset);
                self.reader.skip_payload()?;
                self.stats.dropped_global_headers += 1;
                continue;
            }

            if entry.entry_type().is_pax_local_extensions() {
                self.write_pax_extensions(&entry)?;
                self.stats.entries += 1;
                continue;
            }

            let header = self.canonical_header(&entry)?;
            self.write(header.as_bytes())?;
            let copied = self.reader.copy_payload(&mut self.out)?;
            self.stats.bytes_written += copied;
            self.stats.entries += 1;
        }

        let trailer = write_end_of_archive(&mut self.out, self.stats.bytes_written)?;
        self.stats.bytes_written += trailer;
        self.out.flush()?;

        debug!(
            "Normalized {} entries ({} bytes, {} global headers replaced)",
            self.stats.entries, self.stats.bytes_written, self.stats.dropped_global_headers
        );
        Ok((self.out, self.stats))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.out.write_all(data)?;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn write_global_header(&mut self) -> Result<(), TarFormatError> {
        let record = pax_record("comment", &self.gitref);

        let mut header = tar::Header::new_ustar();
        header.set_path(GLOBAL_HEADER_NAME)?;
        header.set_entry_type(tar::EntryType::XGlobalHeader);
        header.set_mode(0o666);
        header.set_size(record.len() as u64);
        self.stamp(&mut header)?;
        header.set_device_major(0)?;
        header.set_device_minor(0)?;
        header.set_cksum();

        self.write(header.as_bytes())?;
        self.write(&record)?;
        let padding = padded_len(record.len() as u64, BLOCK_SIZE) - record.len() as u64;
        self.write(&vec![0u8; padding as usize])?;
        Ok(())
    }

    /// Re-emits a pax `x` entry without the records that would override the
    /// canonical owner and time fields when the archive is read.
    fn write_pax_extensions(&mut self, entry: &RawEntry) -> Result<(), TarFormatError> {
        let size = entry.header.entry_size().map_err(|e| entry.invalid(e))?;
        let mut payload = Vec::new();
        self.reader.copy_payload(&mut payload)?;
        payload.truncate(usize::try_from(size).map_err(|e| entry.invalid(e))?);

        let records = strip_host_records(&payload).map_err(|reason| entry.invalid(reason))?;
        let len = records.len() as u64;

        let mut header = self.canonical_header(entry)?;
        header.set_size(len);
        header.set_cksum();

        self.write(header.as_bytes())?;
        self.write(&records)?;
        self.write(&vec![0u8; (padded_len(len, BLOCK_SIZE) - len) as usize])?;
        Ok(())
    }

    fn canonical_header(&self, entry: &RawEntry) -> Result<tar::Header, TarFormatError> {
        let source = &entry.header;
        let mut header = tar::Header::new_ustar();

        {
            let (dst, src) = (header.as_old_mut(), source.as_old());
            dst.name = src.name;
            dst.linkflag = src.linkflag;
            dst.linkname = src.linkname;
        }
        // Only ustar headers carry a name prefix; the same bytes hold
        // timestamps and sparse maps in GNU headers.
        if let (Some(src), Some(dst)) = (source.as_ustar(), header.as_ustar_mut()) {
            dst.prefix = src.prefix;
        }

        let mode = source.mode().map_err(|e| entry.invalid(e))?;
        header.set_mode(mode & 0o7777);
        header.set_size(source.entry_size().map_err(|e| entry.invalid(e))?);
        self.stamp(&mut header)?;

        match source.entry_type() {
            tar::EntryType::Char | tar::EntryType::Block => {
                let major = source.device_major().map_err(|e| entry.invalid(e))?;
                let minor = source.device_minor().map_err(|e| entry.invalid(e))?;
                header.set_device_major(major.unwrap_or(0))?;
                header.set_device_minor(minor.unwrap_or(0))?;
            }
            _ => {
                header.set_device_major(0)?;
                header.set_device_minor(0)?;
            }
        }

        header.set_cksum();
        Ok(header)
    }

    fn stamp(&self, header: &mut tar::Header) -> io::Result<()> {
        header.set_mtime(self.timestamp);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username(CANONICAL_OWNER)?;
        header.set_groupname(CANONICAL_OWNER)
    }
}

/// Filters `payload`, a sequence of pax records, dropping keys that carry
/// host-specific owner or time metadata. Other records are kept verbatim.
pub fn strip_host_records(payload: &[u8]) -> Result<Vec<u8>, String> {
    let mut kept = Vec::with_capacity(payload.len());
    let mut rest = payload;

    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or("pax record without a length")?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or("malformed pax record length")?;
        if len <= space + 1 || len > rest.len() {
            return Err(format!("pax record length {len} out of range"));
        }

        let record = &rest[..len];
        let key = record[space + 1..]
            .split(|b| *b == b'=')
            .next()
            .unwrap_or_default();
        if !HOST_PAX_KEYS.iter().any(|host_key| host_key.as_bytes() == key) {
            kept.extend_from_slice(record);
        } else {
            trace!("Dropping pax record {}", String::from_utf8_lossy(key));
        }
        rest = &rest[len..];
    }
    Ok(kept)
}

/// Encodes one pax extended header record, `"<len> <key>=<value>\n"`, where
/// `<len>` counts the whole record including its own digits.
pub fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let body = key.len() + value.len() + 3;
    let mut len = body + 1;
    while len != body + len.to_string().len() {
        len = body + len.to_string().len();
    }
    format!("{len} {key}={value}\n").into_bytes()
}

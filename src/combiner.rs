//! Concatenation of independently generated tar archives.
//!
//! Each `git archive` run produces a complete tar with its own end-of-archive
//! marker. Gluing them together byte-wise would leave those zero blocks in the
//! middle of the stream, and most readers stop at the first one. The combiner
//! copies entries verbatim, drops every intermediate marker, and closes the
//! result with a single marker padded to a full record.
//!
//! [`append_archive`] works in place on the first archive the way `tar -Af`
//! does; [`concatenate`] streams any number of inputs into a writer. Both
//! produce the same bytes for the same inputs in the same order.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::tar_stream::{write_end_of_archive, BlockReader, TarFormatError};

/// Appends every entry of `source` to the archive at `target`, in place.
pub fn append_archive(target: &Path, source: &Path) -> Result<()> {
    let data_end = scan_data_end(target)?;

    let mut file = OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|e| Error::io(target, e))?;
    file.set_len(data_end).map_err(|e| Error::io(target, e))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| Error::io(target, e))?;

    let mut out = BufWriter::new(file);
    let appended = copy_entries(source, &mut out)?;
    let written = data_end + appended;
    write_end_of_archive(&mut out, written)
        .and_then(|_| out.flush())
        .map_err(|e| Error::io(target, e))?;

    debug!(
        "Appended {} ({} bytes of entries) to {}",
        source.display(),
        appended,
        target.display()
    );
    Ok(())
}

/// Folds `archives` pairwise into the first one and returns its path.
pub fn combine(archives: &[PathBuf]) -> Result<PathBuf> {
    let (first, rest) = archives.split_first().ok_or_else(|| Error::Combine {
        path: PathBuf::new(),
        source: TarFormatError::InvalidHeader {
            offset: 0,
            reason: "no archives to combine".to_string(),
        },
    })?;
    for archive in rest {
        append_archive(first, archive)?;
    }
    Ok(first.clone())
}

/// Writes all entries of `inputs`, in order, as one archive into `out`.
pub fn concatenate<P: AsRef<Path>, W: Write>(inputs: &[P], mut out: W) -> Result<W> {
    let mut written = 0;
    for input in inputs {
        written += copy_entries(input.as_ref(), &mut out)?;
    }
    write_end_of_archive(&mut out, written)
        .and_then(|_| out.flush())
        .map_err(|e| Error::io("<output>", e))?;
    Ok(out)
}

/// Copies the header and payload blocks of every entry in `path` into `out`,
/// stopping before its end-of-archive marker.
fn copy_entries<W: Write>(path: &Path, out: &mut W) -> Result<u64> {
    let mut reader = open_blocks(path)?;
    let mut copied = 0;
    let combine_err = |source| Error::Combine {
        path: path.to_path_buf(),
        source,
    };

    while let Some(entry) = reader.next_entry().map_err(combine_err)? {
        out.write_all(entry.header.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        copied += 512 + reader.copy_payload(out).map_err(combine_err)?;
    }
    Ok(copied)
}

fn scan_data_end(path: &Path) -> Result<u64> {
    let mut reader = open_blocks(path)?;
    let combine_err = |source| Error::Combine {
        path: path.to_path_buf(),
        source,
    };
    while reader.next_entry().map_err(combine_err)?.is_some() {}
    Ok(reader.data_end().unwrap_or(0))
}

fn open_blocks(path: &Path) -> Result<BlockReader<impl Read>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    Ok(BlockReader::new(BufReader::new(file)))
}

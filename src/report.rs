//! Summary of a finished build.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::submodule::SubmoduleDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub destination: PathBuf,
    pub commit: String,
    pub prefix: String,
    /// Commit timestamp written into every tar header.
    pub source_date_epoch: u64,
    /// `source_date_epoch` as RFC 3339, for humans.
    pub source_date: String,
    pub submodules: Vec<SubmoduleDescriptor>,
    /// Tar entries in the artifact, excluding the pax global header.
    pub entries: u64,
    /// Size of the compressed artifact in bytes.
    pub size: u64,
    /// Hex SHA-256 of the compressed artifact.
    pub sha256: String,
}

pub fn format_source_date(epoch: u64) -> String {
    i64::try_from(epoch)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|date| date.to_rfc3339())
        .unwrap_or_default()
}

/// Hashes the file at `path`, returning its size and hex SHA-256.
pub fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((size, format!("{:x}", hasher.finalize())))
}

//! Submodule discovery and pin resolution.
//!
//! Submodules are discovered from the repository's index (`.gitmodules` alone
//! does not say which paths are actually linked), and each pin is read from
//! the parent commit's tree rather than from the submodule checkout, so
//! archiving an old commit picks up the submodule state of that commit.

use std::path::Path;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{CommandError, Error, Result};
use crate::git::GitPort;

pub const GITMODULES: &str = ".gitmodules";
const GITLINK_MODE: &str = "160000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmoduleDescriptor {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Commit the parent tree links to.
    pub commit: String,
}

/// Lists submodule paths registered in the repository at `repo`, in listing
/// order. Returns an empty list without running git when there is no
/// `.gitmodules` file.
pub fn list_submodules<G: GitPort>(git: &G, repo: &Path) -> Result<Vec<String>> {
    if !repo.join(GITMODULES).exists() {
        debug!("No {} in {}, skipping submodules", GITMODULES, repo.display());
        return Ok(Vec::new());
    }

    let listing = git
        .list_submodules(repo)
        .map_err(|source| Error::Enumeration {
            repo: repo.to_path_buf(),
            source,
        })?;
    let paths = parse_listing(&listing);
    debug!("Found {} submodule(s) via {}", paths.len(), git.name());
    Ok(paths)
}

/// Extracts submodule paths from `<metadata>\t<path>` records.
///
/// Records are NUL-terminated when the listing contains a NUL (`ls-files -z`,
/// where paths are never quoted and may hold tabs or newlines); the path is
/// then everything after the first tab. Otherwise records are lines and the
/// path is the last tab-separated field. Records whose metadata starts
/// with a file mode other than `160000` are ordinary files and are skipped;
/// records without a mode are taken as-is. Duplicate paths, as produced by
/// unmerged index stages, are reported once.
pub fn parse_listing(listing: &str) -> Vec<String> {
    let nul_terminated = listing.contains('\0');
    let records: Vec<&str> = if nul_terminated {
        listing.split('\0').collect()
    } else {
        listing.lines().collect()
    };

    let mut paths: Vec<String> = Vec::new();
    for record in records {
        let split = if nul_terminated {
            record.split_once('\t')
        } else {
            record.rsplit_once('\t')
        };
        let Some((metadata, path)) = split else {
            trace!("Ignoring listing record without a path: {:?}", record);
            continue;
        };
        if path.is_empty() {
            continue;
        }
        let mode = metadata.split_whitespace().next().unwrap_or_default();
        if is_file_mode(mode) && mode != GITLINK_MODE {
            continue;
        }
        if !paths.iter().any(|seen| seen == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

fn is_file_mode(field: &str) -> bool {
    field.len() == 6 && field.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

/// Resolves the commit `path` is pinned to in the tree of `commit`.
pub fn resolve_submodule<G: GitPort>(
    git: &G,
    repo: &Path,
    commit: &str,
    path: &str,
) -> Result<SubmoduleDescriptor> {
    let resolution_err = |source| Error::Resolution {
        commit: commit.to_string(),
        path: path.to_string(),
        source,
    };

    let output = git
        .resolve_path(repo, commit, path)
        .map_err(resolution_err)?;
    let pinned = output.trim();
    if !is_object_id(pinned) {
        return Err(resolution_err(CommandError::UnexpectedOutput {
            command: format!("resolve {commit}:./{path}"),
            output,
        }));
    }

    debug!("Submodule {} is pinned at {}", path, pinned);
    Ok(SubmoduleDescriptor {
        path: path.to_string(),
        commit: pinned.to_string(),
    })
}

/// Reads the timestamp stamped on every header of the archive for `commit`.
pub fn commit_timestamp<G: GitPort>(git: &G, repo: &Path, commit: &str) -> Result<u64> {
    let timestamp_err = |source| Error::Timestamp {
        commit: commit.to_string(),
        source,
    };

    let output = git
        .commit_timestamp(repo, commit)
        .map_err(timestamp_err)?;
    output
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<u64>().ok())
        .ok_or_else(|| {
            timestamp_err(CommandError::UnexpectedOutput {
                command: format!("timestamp of {commit}"),
                output: output.clone(),
            })
        })
}

fn is_object_id(value: &str) -> bool {
    matches!(value.len(), 40 | 64) && value.bytes().all(|b| b.is_ascii_hexdigit())
}

//! Error types for the archive pipeline.
//!
//! Every stage of a build maps its failures onto one [`Error`] variant, so a
//! caller can tell a bad submodule pin apart from a broken intermediate tar
//! without parsing messages. All of them are fatal: nothing is retried and no
//! artifact is placed at the destination once one is raised.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tar_stream::TarFormatError;

/// Failure of a single external command behind a [`crate::git::GitPort`].
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("failed to execute `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The program succeeded but printed something we cannot interpret.
    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

/// Errors returned by [`crate::SourceArchiveBuilder::build`] and the stages it drives.
#[derive(Debug, Error)]
pub enum Error {
    /// Registered submodules could not be listed.
    #[error("cannot list submodules in {}: {source}", repo.display())]
    Enumeration {
        repo: PathBuf,
        #[source]
        source: CommandError,
    },

    /// The commit a submodule is pinned to could not be determined.
    #[error("cannot resolve submodule `{path}` at commit {commit}: {source}")]
    Resolution {
        commit: String,
        path: String,
        #[source]
        source: CommandError,
    },

    /// The timestamp used for every header could not be read.
    #[error("cannot read timestamp of commit {commit}: {source}")]
    Timestamp {
        commit: String,
        #[source]
        source: CommandError,
    },

    /// `git archive` failed for the root tree or one of the submodules.
    #[error("archive generation failed for {commit} (prefix `{prefix}`): {source}")]
    ArchiveGeneration {
        commit: String,
        prefix: String,
        #[source]
        source: CommandError,
    },

    /// An intermediate tar could not be concatenated.
    #[error("cannot combine {}: {source}", path.display())]
    Combine {
        path: PathBuf,
        #[source]
        source: TarFormatError,
    },

    /// The combined stream could not be rewritten to canonical form.
    #[error("cannot normalize {}: {source}", path.display())]
    Normalization {
        path: PathBuf,
        #[source]
        source: TarFormatError,
    },

    /// Plain file system failure outside of tar parsing.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

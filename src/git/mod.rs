//! The narrow surface through which the pipeline talks to git.
//!
//! Everything that needs the git object store goes through [`GitPort`]:
//! listing submodules, resolving pins, reading the commit timestamp and
//! producing per-module tar files. [`GitCli`] shells out to the `git` binary;
//! tests substitute implementations that return canned outputs.

mod cli;

pub use cli::GitCli;

use std::path::{Path, PathBuf};

use crate::error::CommandError;

pub trait GitPort {
    /// Name of the backend for log messages.
    fn name(&self) -> &str;

    /// Raw submodule listing for the repository at `repo`: `<metadata>\t<path>`
    /// records, one per line or NUL-terminated.
    fn list_submodules(&self, repo: &Path) -> Result<String, CommandError>;

    /// Object id recorded for `path` in the tree of `commit`, as one line.
    fn resolve_path(&self, repo: &Path, commit: &str, path: &str) -> Result<String, CommandError>;

    /// Line whose first whitespace-separated field is the commit's timestamp.
    fn commit_timestamp(&self, repo: &Path, commit: &str) -> Result<String, CommandError>;

    /// Writes an uncompressed tar for `job` at `job.output`.
    fn archive(&self, job: &ArchiveJob) -> Result<(), CommandError>;

    /// Runs the archive command for `job` again with its output discarded.
    fn verify_archive(&self, job: &ArchiveJob) -> Result<(), CommandError>;
}

impl<G: GitPort + ?Sized> GitPort for &G {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_submodules(&self, repo: &Path) -> Result<String, CommandError> {
        (**self).list_submodules(repo)
    }

    fn resolve_path(&self, repo: &Path, commit: &str, path: &str) -> Result<String, CommandError> {
        (**self).resolve_path(repo, commit, path)
    }

    fn commit_timestamp(&self, repo: &Path, commit: &str) -> Result<String, CommandError> {
        (**self).commit_timestamp(repo, commit)
    }

    fn archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        (**self).archive(job)
    }

    fn verify_archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        (**self).verify_archive(job)
    }
}

/// One `git archive` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    /// Root of the parent repository.
    pub repo_root: PathBuf,
    pub commit: String,
    /// Entry names are written as `<prefix>/<name>`.
    pub prefix: String,
    /// Directory inside `commit` to archive; empty for the whole tree.
    pub tree_path: String,
    /// Submodule path relative to `repo_root` when archiving a submodule.
    pub subtree: Option<String>,
    pub output: PathBuf,
}

impl ArchiveJob {
    /// Directory the command must run in: the submodule's own checkout for
    /// submodule jobs, since the pinned commit lives in its object store.
    pub fn working_dir(&self) -> PathBuf {
        match &self.subtree {
            Some(subtree) => self.repo_root.join(subtree),
            None => self.repo_root.clone(),
        }
    }

    pub fn tree_ish(&self) -> String {
        format!("{}:{}", self.commit, self.tree_path)
    }

    pub fn prefix_arg(&self) -> String {
        format!("--prefix={}/", self.prefix)
    }
}

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, trace};

use super::{ArchiveJob, GitPort};
use crate::error::CommandError;

/// [`GitPort`] backed by the `git` executable on `PATH`.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: OsString,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Uses a specific git executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.current_dir(dir).args(args);
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program.to_string_lossy(), args.join(" "))
    }

    fn run_command(&self, dir: &Path, args: &[&str]) -> Result<String, CommandError> {
        let described = self.describe(args);
        debug!("Running `{}` in {}", described, dir.display());

        let output = self
            .command(dir, args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: self.program.to_string_lossy().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: described,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        trace!("`{}` printed {} bytes", described, stdout.len());
        Ok(stdout)
    }

    fn archive_args(job: &ArchiveJob) -> [String; 4] {
        [
            "archive".to_string(),
            "--format=tar".to_string(),
            job.prefix_arg(),
            job.tree_ish(),
        ]
    }
}

impl GitPort for GitCli {
    fn name(&self) -> &str {
        "git"
    }

    fn list_submodules(&self, repo: &Path) -> Result<String, CommandError> {
        self.run_command(repo, &["ls-files", "--stage", "-z"])
    }

    fn resolve_path(&self, repo: &Path, commit: &str, path: &str) -> Result<String, CommandError> {
        self.run_command(repo, &["rev-parse", &format!("{commit}:./{path}")])
    }

    fn commit_timestamp(&self, repo: &Path, commit: &str) -> Result<String, CommandError> {
        self.run_command(repo, &["rev-list", "--timestamp", "--max-count=1", commit])
    }

    fn archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        let base = Self::archive_args(job);
        let output = format!("--output={}", job.output.display());
        let mut args: Vec<&str> = base.iter().map(String::as_str).collect();
        args.push(&output);
        self.run_command(&job.working_dir(), &args).map(|_| ())
    }

    fn verify_archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        let base = Self::archive_args(job);
        let args: Vec<&str> = base.iter().map(String::as_str).collect();
        let described = format!("{} > /dev/null", self.describe(&args));
        debug!("Verifying with `{}` in {}", described, job.working_dir().display());

        let output = self
            .command(&job.working_dir(), &args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: self.program.to_string_lossy().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: described,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

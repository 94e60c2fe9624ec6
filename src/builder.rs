//! End-to-end "git commit → reproducible tar.gz" pipeline.
//!
//! [`SourceArchiveBuilder`] drives one build:
//! 1. reads the commit timestamp that every header will carry,
//! 2. lists submodules and resolves each pin from the parent commit's tree,
//! 3. runs `git archive` for the root tree and then for every submodule,
//! 4. appends the submodule tars onto the root tar,
//! 5. streams the combined tar through [`TarFixer`] into a deterministic gzip
//!    encoder writing a temporary file next to the destination,
//! 6. renames that file onto the destination.
//!
//! All pins are resolved before the first archive is generated, so a bad
//! submodule aborts the build without touching the disk. Intermediate tars are
//! named after the destination and are left behind when a stage fails.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::combiner;
use crate::compressor::{Compressor, DEFAULT_LEVEL};
use crate::error::{Error, Result};
use crate::git::{ArchiveJob, GitPort};
use crate::notifier::Notifier;
use crate::report::{digest_file, format_source_date, BuildReport};
use crate::submodule::{self, SubmoduleDescriptor};
use crate::tar_fixer::{FixStats, TarFixer};

/// What to archive and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub repo_root: PathBuf,
    pub commit: String,
    /// Top-level directory of every entry in the archive.
    pub prefix: String,
    /// Directory of the root tree to archive; empty, `/` or `./` for all of it.
    /// Submodules are always archived whole, under `<prefix>/<submodule path>`.
    pub relative_dir: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Re-run each submodule archive with output discarded to surface failures
    /// some very old git versions only report that way.
    pub verify_archives: bool,
    /// Keep the intermediate tar files after a successful build.
    pub keep_intermediates: bool,
    pub compression_level: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            verify_archives: false,
            keep_intermediates: false,
            compression_level: DEFAULT_LEVEL,
        }
    }
}

/// Paths of the intermediate tars of one build, derived from the destination
/// so concurrent builds to different destinations never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateLayout {
    initial: PathBuf,
}

impl IntermediateLayout {
    pub fn for_destination(destination: &Path) -> Self {
        let mut initial = destination.with_extension("").into_os_string();
        initial.push(".initial");
        Self {
            initial: PathBuf::from(initial),
        }
    }

    /// Tar of the root tree; also the target every submodule tar is appended to.
    pub fn root_tar(&self) -> &Path {
        &self.initial
    }

    pub fn submodule_tar(&self, submodule: &str) -> PathBuf {
        let mut path = self.initial.clone().into_os_string();
        path.push(".");
        path.push(submodule.replace('/', "_"));
        PathBuf::from(path)
    }
}

/// Strips the markers that mean "the whole repository" and any trailing slash.
pub fn normalize_relative_dir(relative_dir: &str) -> String {
    match relative_dir {
        "" | "/" | "./" | "." => String::new(),
        other => other
            .trim_start_matches("./")
            .trim_end_matches('/')
            .to_string(),
    }
}

pub struct SourceArchiveBuilder<G: GitPort> {
    git: G,
    notifier: Notifier,
    options: BuildOptions,
}

impl<G: GitPort> SourceArchiveBuilder<G> {
    pub fn new(git: G, notifier: Notifier) -> Self {
        Self::with_options(git, notifier, BuildOptions::default())
    }

    pub fn with_options(git: G, notifier: Notifier, options: BuildOptions) -> Self {
        Self {
            git,
            notifier,
            options,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Builds the archive described by `request`.
    ///
    /// # Errors
    /// Any failing stage aborts the build. Nothing is written to
    /// `request.destination` unless every stage succeeded.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildReport> {
        let repo_root = absolute(&request.repo_root)?;
        let destination = absolute(&request.destination)?;
        let relative_dir = normalize_relative_dir(&request.relative_dir);
        let commit = request.commit.as_str();

        self.notifier.info(&format!(
            "Archiving {} at {} as {}",
            repo_root.display(),
            commit,
            request.prefix
        ));
        self.notifier.debug(&format!("Destination: {}", destination.display()));

        let timestamp = submodule::commit_timestamp(&self.git, &repo_root, commit)?;
        self.notifier
            .debug(&format!("Commit timestamp: {} ({})", timestamp, format_source_date(timestamp)));

        self.notifier.info("Resolving submodules...");
        let submodules = self.resolve_submodules(&repo_root, commit)?;

        let layout = IntermediateLayout::for_destination(&destination);
        let jobs = self.plan_jobs(request, &repo_root, &relative_dir, &submodules, &layout);
        self.generate_archives(&jobs)?;

        let combined = if jobs.len() > 1 {
            self.notifier
                .info(&format!("Combining {} archives...", jobs.len()));
            let tars: Vec<PathBuf> = jobs.iter().map(|job| job.output.clone()).collect();
            combiner::combine(&tars)?
        } else {
            layout.root_tar().to_path_buf()
        };

        self.notifier.info("Normalizing and compressing...");
        let stats = self.write_artifact(&combined, &destination, timestamp, commit)?;

        if !self.options.keep_intermediates {
            for job in &jobs {
                if let Err(e) = fs::remove_file(&job.output) {
                    self.notifier.warn(&format!(
                        "Could not remove {}: {}",
                        job.output.display(),
                        e
                    ));
                }
            }
        }

        let (size, sha256) =
            digest_file(&destination).map_err(|e| Error::io(&destination, e))?;
        self.notifier.info(&format!("Wrote {}", destination.display()));
        self.notifier.finish();

        Ok(BuildReport {
            destination,
            commit: commit.to_string(),
            prefix: request.prefix.clone(),
            source_date_epoch: timestamp,
            source_date: format_source_date(timestamp),
            submodules,
            entries: stats.entries,
            size,
            sha256,
        })
    }

    fn resolve_submodules(
        &self,
        repo_root: &Path,
        commit: &str,
    ) -> Result<Vec<SubmoduleDescriptor>> {
        submodule::list_submodules(&self.git, repo_root)?
            .iter()
            .map(|path| submodule::resolve_submodule(&self.git, repo_root, commit, path))
            .collect()
    }

    fn plan_jobs(
        &self,
        request: &BuildRequest,
        repo_root: &Path,
        relative_dir: &str,
        submodules: &[SubmoduleDescriptor],
        layout: &IntermediateLayout,
    ) -> Vec<ArchiveJob> {
        let root = ArchiveJob {
            repo_root: repo_root.to_path_buf(),
            commit: request.commit.clone(),
            prefix: request.prefix.clone(),
            tree_path: relative_dir.to_string(),
            subtree: None,
            output: layout.root_tar().to_path_buf(),
        };

        let nested = submodules.iter().map(|descriptor| ArchiveJob {
            repo_root: repo_root.to_path_buf(),
            commit: descriptor.commit.clone(),
            prefix: format!("{}/{}", request.prefix, descriptor.path),
            tree_path: String::new(),
            subtree: Some(descriptor.path.clone()),
            output: layout.submodule_tar(&descriptor.path),
        });

        std::iter::once(root).chain(nested).collect()
    }

    fn generate_archives(&self, jobs: &[ArchiveJob]) -> Result<()> {
        let progress = self.notifier.job_progress(jobs.len() as u64);

        for job in jobs {
            let label = job.subtree.as_deref().unwrap_or("root tree");
            self.notifier
                .info(&format!("Archiving {} at {}", label, job.commit));
            if let Some(bar) = &progress {
                bar.set_message(label.to_string());
            }

            self.git
                .archive(job)
                .map_err(|source| Error::ArchiveGeneration {
                    commit: job.commit.clone(),
                    prefix: job.prefix.clone(),
                    source,
                })?;

            if self.options.verify_archives && job.subtree.is_some() {
                if let Err(e) = self.git.verify_archive(job) {
                    self.notifier.warn(&format!(
                        "Archive check for {} failed, the archive may be incomplete: {}",
                        label, e
                    ));
                }
            }

            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        Ok(())
    }

    fn write_artifact(
        &self,
        combined: &Path,
        destination: &Path,
        timestamp: u64,
        commit: &str,
    ) -> Result<FixStats> {
        let dir = destination
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;

        let input = File::open(combined).map_err(|e| Error::io(combined, e))?;
        let compressor = Compressor::new(self.options.compression_level);
        let encoder = compressor.writer(BufWriter::new(staging));

        let (encoder, stats) = TarFixer::new(BufReader::new(input), encoder, timestamp, commit)
            .fix()
            .map_err(|source| Error::Normalization {
                path: combined.to_path_buf(),
                source,
            })?;

        let mut staging = encoder
            .finish()
            .and_then(|writer| writer.into_inner().map_err(|e| e.into_error()))
            .map_err(|e| Error::io(destination, e))?;
        staging.flush().map_err(|e| Error::io(destination, e))?;
        staging
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(destination, e))?;
        // Temporary files are created owner-only; release artifacts are not.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staging
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(|e| Error::io(destination, e))?;
        }
        staging
            .persist(destination)
            .map_err(|e| Error::io(destination, e.error))?;

        self.notifier.debug(&format!(
            "Normalized {} entries into {}",
            stats.entries,
            destination.display()
        ));
        Ok(stats)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::io(path, e))
}

//! Shared fixtures for the pipeline tests.
//!
//! [`FakeGit`] stands in for the git binary. Its archives are written with the
//! owner, timestamp and header flavor of a configurable [`Host`], so two builds
//! of the same trees on different "machines" produce different intermediate
//! tars while the final artifacts must still match.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use reprotar::tar_fixer::pax_record;
use reprotar::{ArchiveJob, CommandError, GitPort};
use tar_rs as tar;

pub const PARENT_COMMIT: &str = "1111111111111111111111111111111111111111";
pub const FOO_COMMIT: &str = "2222222222222222222222222222222222222222";
pub const BAR_COMMIT: &str = "3333333333333333333333333333333333333333";
pub const COMMIT_TIME: u64 = 1_600_000_000;

/// Owner and clock of the machine an intermediate tar was produced on.
#[derive(Debug, Clone, Copy)]
pub struct Host {
    pub uid: u64,
    pub gid: u64,
    pub user: &'static str,
    pub group: &'static str,
    pub mtime: u64,
    pub gnu: bool,
}

pub const HOST_A: Host = Host {
    uid: 1000,
    gid: 1000,
    user: "alice",
    group: "alice",
    mtime: 1_650_000_000,
    gnu: false,
};

pub const HOST_B: Host = Host {
    uid: 501,
    gid: 20,
    user: "builder",
    group: "staff",
    mtime: 1_700_000_123,
    gnu: true,
};

pub struct FakeGit {
    host: Host,
    listing: String,
    pins: HashMap<String, String>,
    trees: HashMap<String, Vec<(String, Vec<u8>)>>,
    failing: HashSet<String>,
    failing_verify: HashSet<String>,
    calls: RefCell<Vec<String>>,
}

impl FakeGit {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            listing: String::new(),
            pins: HashMap::new(),
            trees: HashMap::new(),
            failing: HashSet::new(),
            failing_verify: HashSet::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_tree(mut self, commit: &str, files: &[(&str, &str)]) -> Self {
        let files = files
            .iter()
            .map(|(name, content)| (name.to_string(), content.as_bytes().to_vec()))
            .collect();
        self.trees.insert(commit.to_string(), files);
        self
    }

    /// Registers `path` as a gitlink pinned at `commit`.
    pub fn with_submodule(mut self, path: &str, commit: &str) -> Self {
        self.listing.push_str(&format!("160000 {commit} 0\t{path}\n"));
        self.pins.insert(path.to_string(), commit.to_string());
        self
    }

    /// Lists `path` as a submodule that the parent commit has no entry for.
    pub fn with_dangling_submodule(mut self, path: &str) -> Self {
        self.listing.push_str(&format!("160000 {FOO_COMMIT} 0\t{path}\n"));
        self
    }

    pub fn failing_archive(mut self, commit: &str) -> Self {
        self.failing.insert(commit.to_string());
        self
    }

    /// Makes the discarded-output re-run fail for `commit` while the real
    /// archive still succeeds.
    pub fn failing_verify(mut self, commit: &str) -> Self {
        self.failing_verify.insert(commit.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn header(&self, kind: tar::EntryType, mode: u32, size: u64) -> tar::Header {
        let mut header = if self.host.gnu {
            tar::Header::new_gnu()
        } else {
            tar::Header::new_ustar()
        };
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_uid(self.host.uid);
        header.set_gid(self.host.gid);
        header.set_username(self.host.user).unwrap();
        header.set_groupname(self.host.group).unwrap();
        header.set_mtime(self.host.mtime);
        header
    }

    fn write_tar(&self, job: &ArchiveJob, files: &[(String, Vec<u8>)]) {
        let mut members: BTreeMap<String, Option<&[u8]>> = BTreeMap::new();
        members.insert(format!("{}/", job.prefix), None);

        for (name, content) in files {
            let relative = if job.tree_path.is_empty() {
                name.as_str()
            } else {
                match name
                    .strip_prefix(job.tree_path.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            let mut dir = String::new();
            let mut components: Vec<&str> = relative.split('/').collect();
            components.pop();
            for component in components {
                dir.push_str(component);
                dir.push('/');
                members.insert(format!("{}/{}", job.prefix, dir), None);
            }
            members.insert(
                format!("{}/{}", job.prefix, relative),
                Some(content.as_slice()),
            );
        }

        let mut builder = tar::Builder::new(File::create(&job.output).unwrap());

        if job.subtree.is_none() {
            let comment = pax_record("comment", &job.commit);
            let mut header =
                self.header(tar::EntryType::XGlobalHeader, 0o666, comment.len() as u64);
            builder
                .append_data(&mut header, "pax_global_header", comment.as_slice())
                .unwrap();
        }

        for (name, content) in &members {
            match content {
                Some(data) => {
                    let mut header =
                        self.header(tar::EntryType::Regular, 0o664, data.len() as u64);
                    builder.append_data(&mut header, name, *data).unwrap();
                }
                None => {
                    let mut header = self.header(tar::EntryType::Directory, 0o775, 0);
                    builder
                        .append_data(&mut header, name, std::io::empty())
                        .unwrap();
                }
            }
        }

        builder.into_inner().unwrap();
    }
}

impl GitPort for FakeGit {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_submodules(&self, _repo: &Path) -> Result<String, CommandError> {
        self.record("list".to_string());
        Ok(self.listing.clone())
    }

    fn resolve_path(&self, _repo: &Path, commit: &str, path: &str) -> Result<String, CommandError> {
        self.record(format!("resolve {path}"));
        match self.pins.get(path) {
            Some(pinned) => Ok(format!("{pinned}\n")),
            None => Err(CommandError::Failed {
                command: format!("git rev-parse {commit}:./{path}"),
                code: Some(128),
                stderr: format!("fatal: path '{path}' does not exist in '{commit}'"),
            }),
        }
    }

    fn commit_timestamp(&self, _repo: &Path, commit: &str) -> Result<String, CommandError> {
        self.record("timestamp".to_string());
        if self.trees.contains_key(commit) {
            Ok(format!("{COMMIT_TIME} {commit}\n"))
        } else {
            Err(CommandError::Failed {
                command: format!("git rev-list --timestamp --max-count=1 {commit}"),
                code: Some(128),
                stderr: format!("fatal: bad revision '{commit}'"),
            })
        }
    }

    fn archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        self.record(format!("archive {} {}", job.commit, job.prefix));
        if self.failing.contains(&job.commit) {
            return Err(CommandError::Failed {
                command: format!("git archive {}", job.tree_ish()),
                code: Some(128),
                stderr: format!("fatal: not a tree object: {}", job.commit),
            });
        }
        let files = self.trees.get(&job.commit).ok_or_else(|| CommandError::Failed {
            command: format!("git archive {}", job.tree_ish()),
            code: Some(128),
            stderr: format!("fatal: not a valid object name {}", job.commit),
        })?;
        self.write_tar(job, files);
        Ok(())
    }

    fn verify_archive(&self, job: &ArchiveJob) -> Result<(), CommandError> {
        self.record(format!("verify {}", job.commit));
        if self.failing_verify.contains(&job.commit) {
            return Err(CommandError::Failed {
                command: format!("git archive {} > /dev/null", job.tree_ish()),
                code: Some(128),
                stderr: "fatal: current working directory is untracked".to_string(),
            });
        }
        Ok(())
    }
}

/// One member of a finished artifact, as a tar reader sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub path: String,
    pub kind: tar::EntryType,
    pub mode: u32,
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    pub username: String,
    pub groupname: String,
    pub data: Vec<u8>,
}

/// Decompresses and lists `artifact`. Returns the `comment` of the global
/// header, if any, and the remaining members in archive order.
pub fn read_artifact(artifact: &Path) -> (Option<String>, Vec<Member>) {
    let mut tar_bytes = Vec::new();
    GzDecoder::new(File::open(artifact).unwrap())
        .read_to_end(&mut tar_bytes)
        .unwrap();
    read_tar(&tar_bytes)
}

pub fn read_tar(tar_bytes: &[u8]) -> (Option<String>, Vec<Member>) {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut comment = None;
    let mut members = Vec::new();

    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();

        let header = entry.header().clone();
        if header.entry_type() == tar::EntryType::XGlobalHeader {
            let record = String::from_utf8(data).unwrap();
            comment = record
                .split_once(" comment=")
                .map(|(_, value)| value.trim_end_matches('\n').to_string());
            continue;
        }

        members.push(Member {
            path: entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string(),
            kind: header.entry_type(),
            mode: header.mode().unwrap(),
            mtime: header.mtime().unwrap(),
            uid: header.uid().unwrap(),
            gid: header.gid().unwrap(),
            username: header.username().unwrap().unwrap_or_default().to_string(),
            groupname: header.groupname().unwrap().unwrap_or_default().to_string(),
            data,
        });
    }

    (comment, members)
}

pub fn paths(members: &[Member]) -> Vec<&str> {
    members.iter().map(|member| member.path.as_str()).collect()
}

/// A directory laid out like a checkout, with `.gitmodules` when `submodules`.
pub fn checkout(submodules: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    if submodules {
        fs::write(
            dir.path().join(".gitmodules"),
            "[submodule \"libs/foo\"]\n\tpath = libs/foo\n\turl = ../foo.git\n",
        )
        .unwrap();
    }
    dir
}

pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    entries
}

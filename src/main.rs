use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::debug;
use std::path::PathBuf;

use reprotar::compressor::DEFAULT_LEVEL;
use reprotar::notifier::VerbosityLevel;
use reprotar::{BuildOptions, BuildRequest, GitCli, Notifier, SourceArchiveBuilder};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, help = "Commit to archive")]
    commit: String,

    #[arg(short, long, help = "Top-level directory of every archive entry (e.g. myproj-1.0)")]
    prefix: String,

    #[arg(short, long, help = "Path of the .tar.gz to write")]
    output: PathBuf,

    #[arg(
        short = 'C',
        long,
        default_value = ".",
        help = "Root of the git repository"
    )]
    repo: PathBuf,

    #[arg(
        long,
        default_value = "",
        help = "Directory of the root tree to archive (default: all of it); submodules are always included"
    )]
    relative_dir: String,

    #[arg(
        long,
        default_value_t = DEFAULT_LEVEL,
        value_parser = clap::value_parser!(u32).range(0..=9),
        help = "gzip compression level"
    )]
    level: u32,

    #[arg(
        long,
        help = "Re-run each submodule archive with output discarded to surface hidden git failures"
    )]
    verify_archives: bool,

    #[arg(long, help = "Keep intermediate tar files next to the output")]
    keep_intermediates: bool,

    #[arg(long, help = "Print the build report as JSON")]
    json: bool,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default())
        .filter_level(VerbosityLevel::from(cli.verbose).to_log_level())
        .init();

    debug!("Repository: {}", cli.repo.display());
    debug!("Relative dir: {:?}", cli.relative_dir);
    debug!("Output: {}", cli.output.display());

    let options = BuildOptions {
        verify_archives: cli.verify_archives,
        keep_intermediates: cli.keep_intermediates,
        compression_level: cli.level,
    };
    let request = BuildRequest {
        repo_root: cli.repo,
        commit: cli.commit,
        prefix: cli.prefix,
        relative_dir: cli.relative_dir,
        destination: cli.output,
    };

    let builder =
        SourceArchiveBuilder::with_options(GitCli::new(), Notifier::new(cli.verbose), options);
    let report = builder.build(&request).with_context(|| {
        format!(
            "Failed to build {} from commit {}",
            request.destination.display(),
            request.commit
        )
    })?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize build report")?
        );
    } else {
        println!("Wrote: {}", report.destination.display());
    }

    Ok(())
}

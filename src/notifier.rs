//! Build progress reporting.
//!
//! [`Notifier`] puts `env_logger` text logs and an `indicatif` spinner behind
//! one verbosity switch:
//! - [`VerbosityLevel::Quiet`]: no text logs below warnings; a spinner shows
//!   the current stage and a bar counts archive jobs.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`]:
//!   plain log lines, no progress widgets.

use std::cell::RefCell;
use std::time::Duration;

use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{warn, Level, LevelFilter, Log, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    Quiet = 0,
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: env_logger::Logger,
    multi_progress: Option<MultiProgress>,
    spinner: RefCell<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        let logger = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build();

        let multi_progress = (verbosity == VerbosityLevel::Quiet).then(MultiProgress::new);

        Self {
            verbosity,
            logger,
            multi_progress,
            spinner: RefCell::new(None),
        }
    }

    /// A notifier that neither logs nor draws, for embedding and tests.
    pub fn silent() -> Self {
        let notifier = Self::new(0);
        if let Some(multi_progress) = &notifier.multi_progress {
            multi_progress.set_draw_target(ProgressDrawTarget::hidden());
        }
        notifier
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }

    /// Reports the stage the build is in.
    pub fn info(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => {
                let mut spinner = self.spinner.borrow_mut();
                let spinner = spinner.get_or_insert_with(|| {
                    let bar = multi_progress.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                        bar.set_style(style);
                    }
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                spinner.set_message(message.to_string());
            }
            None => self.log(Level::Info, message),
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        match &self.multi_progress {
            Some(multi_progress) => {
                if let Err(e) = multi_progress.println(format!("warning: {message}")) {
                    warn!("{} (progress display unavailable: {})", message, e);
                }
            }
            None => self.log(Level::Warn, message),
        }
    }

    /// Progress bar over `length` archive jobs; only drawn in quiet mode.
    pub fn job_progress(&self, length: u64) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let bar = multi_progress.add(ProgressBar::new(length));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Some(bar)
    }

    /// Clears any progress widgets left on screen.
    pub fn finish(&self) {
        if let Some(spinner) = self.spinner.borrow_mut().take() {
            spinner.finish_and_clear();
        }
    }

    fn log(&self, level: Level, message: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }
}

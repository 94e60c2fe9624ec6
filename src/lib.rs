pub mod builder;
pub mod combiner;
pub mod compressor;
pub mod error;
pub mod git;
pub mod notifier;
pub mod report;
pub mod submodule;
pub mod tar_fixer;
pub mod tar_stream;

// Re-exports for easy access
pub use builder::{BuildOptions, BuildRequest, SourceArchiveBuilder};
pub use error::{CommandError, Error};
pub use git::{ArchiveJob, GitCli, GitPort};
pub use notifier::Notifier;
pub use report::BuildReport;
pub use submodule::SubmoduleDescriptor;
pub use tar_fixer::TarFixer;

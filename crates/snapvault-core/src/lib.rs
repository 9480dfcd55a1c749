pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod fsutil;
pub mod hasher;
pub mod index;
pub mod master;
pub mod metadata;
pub mod platform;
pub mod process;
pub mod progress;
pub mod snapshot;

pub use config::AppConfig;
pub use dedup::DedupReport;
pub use engine::{BackupEngine, UpdateOptions, UpdateReport};
pub use error::Error;
pub use index::{Index, IndexEntry};
pub use master::MergeReport;
pub use metadata::{AmbiguousPolicy, AmbiguousSummary, ConfirmPrompt, DeclineAll, MetadataReport};
pub use process::{ProcessOptions, ProcessReport};
pub use progress::{ProgressReporter, SilentReporter};
pub use snapshot::BuildReport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "snapvault")]
#[command(about = "Incremental hardlinked backups of photo exports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract downloaded exports, deduplicate them and fix capture times
    Process {
        /// Only process this export id
        #[arg(long = "export")]
        export: Option<String>,
        /// Re-extract archives already marked as processed
        #[arg(long)]
        force_extraction: bool,
        /// Re-run metadata correction on processed exports
        #[arg(long)]
        force_metadata: bool,
        /// Re-run deduplication across processed exports
        #[arg(long)]
        force_dedup: bool,
        /// How to handle ambiguous sidecar matches: yes, no or interactive
        #[arg(long)]
        fix_ambiguous_metadata: Option<String>,
    },
    /// Build a new snapshot from completed exports
    UpdateBackup {
        /// Downloads directory to read exports from
        #[arg(long)]
        source: Option<PathBuf>,
        /// Report what would happen without touching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Hardlink identical files across existing snapshots
    FixHardlinks {
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh the content index of every snapshot
    RebuildIndex,
    /// Merge every snapshot into the master view
    RebuildMaster,
    /// Apply sidecar capture times to media files in a directory
    CorrectMetadata {
        dir: PathBuf,
        /// How to handle ambiguous sidecar matches: yes, no or interactive
        #[arg(long)]
        fix_ambiguous_metadata: Option<String>,
    },
    /// Print configuration values
    PrintConfig,
}

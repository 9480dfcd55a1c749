mod commands;
mod logging;
mod progress;
mod prompt;

use std::path::Path;
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use prompt::TerminalPrompt;
use snapvault_core::{
    AmbiguousPolicy, AppConfig, BackupEngine, ProcessOptions, UpdateOptions,
};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let loaded = snapvault_core::config::load_configuration();
    let fallback = AppConfig::default();
    let _guard = logging::init_logger(loaded.as_ref().unwrap_or(&fallback));

    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Process {
            export,
            force_extraction,
            force_metadata,
            force_dedup,
            fix_ambiguous_metadata,
        }) => {
            let options = ProcessOptions {
                target_export: export,
                force_extraction,
                force_metadata,
                force_dedup,
            };
            run_process(config, options, fix_ambiguous_metadata.as_deref())
        }
        Some(Commands::UpdateBackup { source, dry_run }) => {
            run_update_backup(config, UpdateOptions { source, dry_run })
        }
        Some(Commands::FixHardlinks { dry_run }) => run_fix_hardlinks(config, dry_run),
        Some(Commands::RebuildIndex) => run_rebuild_index(config),
        Some(Commands::RebuildMaster) => run_rebuild_master(config),
        Some(Commands::CorrectMetadata {
            dir,
            fix_ambiguous_metadata,
        }) => run_correct_metadata(config, &dir, fix_ambiguous_metadata.as_deref()),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn parse_policy(value: Option<&str>) -> anyhow::Result<Option<AmbiguousPolicy>> {
    value
        .map(|v| v.parse::<AmbiguousPolicy>())
        .transpose()
        .context("invalid --fix-ambiguous-metadata value")
}

fn run_process(
    mut config: AppConfig,
    options: ProcessOptions,
    policy: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(policy) = parse_policy(policy)? {
        config.fix_ambiguous_metadata = policy;
    }
    let engine = BackupEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.process(options, &TerminalPrompt, &reporter)?;

    println!();
    info!(
        "{} exports processed, {} skipped",
        format!("{}", report.exports_processed.len()).green(),
        format!("{}", report.exports_skipped.len()).yellow(),
    );
    for (id, reason) in &report.exports_skipped {
        warn!("  {}: {}", id, reason);
    }
    info!(
        "{} files extracted ({} bytes), {} linked to backup, {} linked within batch",
        format!("{}", report.files_extracted).cyan(),
        report.bytes_extracted,
        format!("{}", report.linked_to_backup).green(),
        format!("{}", report.linked_in_batch).green(),
    );
    info!(
        "{} capture times updated, {} media files without a sidecar",
        format!("{}", report.metadata_updated).green(),
        format!("{}", report.metadata_unmatched).yellow(),
    );
    if report.metadata_ambiguous_found > 0 {
        info!(
            "{} ambiguous matches, {} applied",
            format!("{}", report.metadata_ambiguous_found).yellow(),
            report.metadata_ambiguous_applied,
        );
    }
    if let Some(dedup) = &report.dedup {
        info!(
            "Dedup: {} groups, {} linked, {} bytes reclaimed",
            dedup.groups,
            format!("{}", dedup.linked).green(),
            dedup.bytes_reclaimed,
        );
    }
    Ok(())
}

fn run_update_backup(config: AppConfig, options: UpdateOptions) -> anyhow::Result<()> {
    let dry_run = options.dry_run;
    let engine = BackupEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.update_backup(options, &reporter)?;

    println!();
    let Some(snapshot) = &report.snapshot else {
        info!("{}", "No completed exports; no snapshot created".yellow());
        return Ok(());
    };
    let build = &report.build;
    info!(
        "{} {}",
        if dry_run { "Would create" } else { "Created" },
        snapshot.display().to_string().cyan()
    );
    info!(
        "{} added ({} bytes), {} linked to previous, {} internal links, {} failed",
        format!("{}", build.added).green(),
        build.total_new_bytes,
        format!("{}", build.linked).green(),
        build.internal_links,
        format!("{}", build.failed).red(),
    );
    for (id, reason) in &build.exports_skipped {
        warn!("  Skipped {}: {}", id, reason);
    }
    if let Some(master) = &report.master {
        info!(
            "Master: {} linked, {} already present, {} renamed",
            format!("{}", master.linked).green(),
            master.known,
            master.renamed,
        );
    }
    Ok(())
}

fn run_fix_hardlinks(config: AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let engine = BackupEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.fix_hardlinks(dry_run, &reporter)?;

    println!();
    info!(
        "{} duplicate groups, {} {}, {} already linked, {} groups spanning devices, {} failed",
        format!("{}", report.groups).cyan(),
        format!("{}", report.linked).green(),
        if dry_run { "would be linked" } else { "linked" },
        report.already_linked,
        report.cross_device,
        format!("{}", report.failed).red(),
    );
    info!(
        "{} bytes {}",
        format!("{}", report.bytes_reclaimed).green(),
        if dry_run { "reclaimable" } else { "reclaimed" },
    );
    for path in &report.stranded {
        error!("{} {}", "Stranded, restore manually:".red(), path.display());
    }
    Ok(())
}

fn run_rebuild_index(config: AppConfig) -> anyhow::Result<()> {
    let engine = BackupEngine::new(config);
    let reporter = CliReporter::new();
    let results = engine.rebuild_index(&reporter)?;

    println!();
    for (snapshot, stats) in &results {
        info!(
            "{}: {} files, {} hashed, {} reused, {} dropped",
            snapshot.display().to_string().cyan(),
            stats.files_seen,
            format!("{}", stats.files_hashed).yellow(),
            format!("{}", stats.files_reused).green(),
            stats.entries_dropped,
        );
    }
    Ok(())
}

fn run_rebuild_master(config: AppConfig) -> anyhow::Result<()> {
    let engine = BackupEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.rebuild_master(&reporter)?;

    println!();
    info!(
        "Master: {} linked, {} already present, {} renamed, {} failed",
        format!("{}", report.linked).green(),
        report.known,
        report.renamed,
        format!("{}", report.failed).red(),
    );
    Ok(())
}

fn run_correct_metadata(config: AppConfig, dir: &Path, policy: Option<&str>) -> anyhow::Result<()> {
    let policy = parse_policy(policy)?;
    let engine = BackupEngine::new(config);
    let report = engine
        .correct_metadata(dir, policy, &TerminalPrompt)
        .with_context(|| format!("correcting metadata in {}", dir.display()))?;

    println!();
    info!(
        "{} media files, {} sidecars",
        report.media_files, report.sidecars
    );
    info!(
        "Matched: {} exact, {} cleaned, {} truncated, {} ambiguous ({} applied)",
        format!("{}", report.matched_exact).green(),
        format!("{}", report.matched_cleaned).green(),
        format!("{}", report.matched_truncated).green(),
        format!("{}", report.ambiguous_found).yellow(),
        report.ambiguous_applied,
    );
    info!(
        "{} updated, {} failed, {} without a sidecar",
        format!("{}", report.updated).green(),
        format!("{}", report.failed).red(),
        format!("{}", report.unmatched.len()).yellow(),
    );
    Ok(())
}

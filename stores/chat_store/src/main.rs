use std::time::Duration;

use anyhow::Result;
use chat_store::{
    build_coordinator,
    config::{Cli, Command, Config},
};
use clap::Parser;
use janitor::{spawn_housekeeping, AuditEvent};
use janitor_api::AuditReport;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let coordinator = build_coordinator(&cfg)?;
    let command = cli.command.clone().unwrap_or(Command::Audit {
        cleanup: false,
        json: false,
    });

    match command {
        Command::Audit { cleanup, json } => {
            let report = coordinator
                .audit_and_cleanup_with_completion(cleanup)
                .wait()
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&*report)?);
            } else {
                print_summary(&report);
            }
        }
        Command::Launch => match coordinator.run_if_due() {
            Some(ticket) => {
                let report = ticket.wait().await?;
                print_summary(&report);
            }
            None => println!("already cleaned for version {}", cfg.app_version),
        },
        Command::Housekeep => {
            let mut events = coordinator.subscribe();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        AuditEvent::Failed { run_id, reason } => {
                            warn!(%run_id, %reason, "audit failed")
                        }
                        other => info!(event = ?other, "audit event"),
                    }
                }
            });
            if let Some(ticket) = coordinator.run_if_due() {
                if let Err(err) = ticket.wait().await {
                    warn!(error = %err, "launch cleanup failed");
                }
            }
            let every = Duration::from_secs(cfg.housekeeping_interval_secs);
            let handle = spawn_housekeeping(coordinator.clone(), every);
            info!(interval_secs = cfg.housekeeping_interval_secs, "housekeeping running");
            tokio::signal::ctrl_c().await?;
            coordinator.cancel();
            handle.abort();
        }
    }
    Ok(())
}

fn print_summary(report: &AuditReport) {
    println!("run {} ({:?})", report.run_id, report.mode);
    println!(
        "  referenced {} paths, {} files present",
        report.referenced_paths, report.present_files
    );
    println!(
        "  orphan files: {} ({} bytes reclaimable)",
        report.orphan_file_count, report.reclaimable_bytes
    );
    for orphan in &report.orphan_files {
        println!("    [{}] {}", orphan.root, orphan.path.display());
    }
    println!("  orphan records: {}", report.orphan_record_count);
    for record in &report.orphan_records {
        println!("    {} -> {}", record.key, record.path.display());
    }
    if !report.dangling_records.is_empty() {
        println!("  dangling records: {}", report.dangling_records.len());
        for d in &report.dangling_records {
            println!("    {} (owner {} is gone)", d.key, d.missing_owner);
        }
    }
    if report.malformed_records > 0 || report.skipped_entries > 0 {
        println!(
            "  skipped: {} malformed records, {} unreadable entries",
            report.malformed_records, report.skipped_entries
        );
    }
    match &report.cleanup {
        Some(c) => println!(
            "  removed {} files ({} bytes), {} failed, {} already gone, {} dirs pruned",
            c.removed_files,
            c.removed_bytes,
            c.failed.len(),
            c.already_gone,
            c.pruned_dirs
        ),
        None => println!("  audit only, nothing deleted"),
    }
}

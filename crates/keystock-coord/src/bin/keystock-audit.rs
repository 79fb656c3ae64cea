//! # keystock-audit
//!
//! Integrity audit against a keystock database, once or on an interval.
//!
//! ## Usage
//! ```bash
//! # Report findings (exit code 1 if any)
//! cargo run -p keystock-coord --bin keystock-audit -- --db ./keystock_dev.db
//!
//! # Repair what can be repaired, then report what is left
//! cargo run -p keystock-coord --bin keystock-audit -- --repair
//!
//! # Machine-readable output on stdout, logs on stderr
//! cargo run -p keystock-coord --bin keystock-audit -- --repair --json
//!
//! # Keep auditing on the [audit] interval until Ctrl-C
//! KEYSTOCK_AUDIT_INTERVAL_SECS=60 cargo run -p keystock-coord --bin keystock-audit -- --watch
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use keystock_core::{FindingKind, IntegrityReport, RepairSummary, Source};
use keystock_coord::{AuditScheduler, Coordinator, CoordinatorConfig};

#[derive(Serialize)]
struct AuditOutput<'a> {
    report: &'a IntegrityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    repair: Option<&'a RepairSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<&'a IntegrityReport>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keystock=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut repair = false;
    let mut json = false;
    let mut watch = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--repair" | "-r" => repair = true,
            "--json" => json = true,
            "--watch" | "-w" => watch = true,
            "--help" | "-h" => {
                println!("keystock Integrity Audit");
                println!();
                println!("Usage: keystock-audit [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file (overrides config)");
                println!("  -c, --config <PATH>    Config file (default: platform config dir)");
                println!("  -r, --repair           Apply automatic repairs, then rescan");
                println!("      --json             Print the report as JSON");
                println!("  -w, --watch            Audit on the configured interval until Ctrl-C");
                println!("  -h, --help             Show this help message");
                return Ok(ExitCode::SUCCESS);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                return Ok(ExitCode::from(2));
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => CoordinatorConfig::load(Some(path))?,
        None => CoordinatorConfig::load_or_default(None),
    };
    if let Some(path) = db_path {
        config.database.path = path;
    }

    let coordinator = Coordinator::connect(&config).await?;

    if watch {
        let Some(interval) = config.audit.interval() else {
            eprintln!("--watch needs [audit] interval_secs > 0");
            return Ok(ExitCode::from(2));
        };
        let auto_repair = repair || config.audit.auto_repair;
        let handle = AuditScheduler::spawn(coordinator.clone(), interval, auto_repair);

        tokio::signal::ctrl_c().await?;
        handle.shutdown().await?;
        if let Some(run) = handle.latest().await {
            print_report("Last scan", &run.report);
        }
        coordinator.shutdown().await;
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = coordinator.context(Source::Admin);

    let report = coordinator.scan(&ctx).await?;
    let (summary, remaining) = if repair && !report.is_clean() {
        let summary = coordinator.repair(&coordinator.context(Source::Admin), &report).await?;
        let remaining = coordinator.scan(&coordinator.context(Source::Admin)).await?;
        (Some(summary), Some(remaining))
    } else {
        (None, None)
    };

    if json {
        let output = AuditOutput {
            report: &report,
            repair: summary.as_ref(),
            remaining: remaining.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report("Scan", &report);
        if let Some(summary) = &summary {
            print_summary(summary);
        }
        if let Some(remaining) = &remaining {
            print_report("Rescan", remaining);
        }
    }

    let clean = remaining.as_ref().unwrap_or(&report).is_clean();
    coordinator.shutdown().await;

    Ok(if clean { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn print_report(title: &str, report: &IntegrityReport) {
    println!(
        "{}: {} products, {} units",
        title, report.scanned_products, report.scanned_units
    );
    if report.is_clean() {
        println!("  ✓ no findings");
        return;
    }
    for kind in FindingKind::ALL {
        let count = report.count(kind);
        if count > 0 {
            let note = if kind.is_auto_repairable() { "" } else { " (needs admin)" };
            println!("  {:<18} {}{}", kind.as_str(), count, note);
        }
    }
}

fn print_summary(summary: &RepairSummary) {
    println!("Repair:");
    println!("  barcodes assigned       {}", summary.barcodes_assigned);
    println!("  flags corrected         {}", summary.flags_corrected);
    println!("  stock reconciled        {}", summary.stock_reconciled);
    println!("  stale barcodes released {}", summary.stale_barcodes_released);
    println!("  skipped                 {}", summary.skipped.len());
    for failure in &summary.failures {
        println!("  ✗ {:?}: {}", failure.finding.kind(), failure.error);
    }
}

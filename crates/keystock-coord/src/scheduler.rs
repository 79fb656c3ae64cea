//! # Audit Scheduler
//!
//! Runs the integrity auditor on a fixed interval, optionally repairing what
//! each scan finds.
//!
//! ## Tick Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  interval.tick()                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  seq = change_journal latest seq                                        │
//! │  seq == last audited seq? ── yes ──► skip                               │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  scan() ── clean ──► remember seq                                       │
//! │       │ findings                                                        │
//! │       ▼                                                                 │
//! │  auto_repair? ── no ──► log findings, remember seq                      │
//! │       │ yes                                                             │
//! │       ▼                                                                 │
//! │  repair(report) ──► remember seq (read before the scan)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The journal is filled by database triggers, so writes made outside this
//! process (the other write path, an import) also wake the scheduler.
//!
//! Only the sequence observed before the scan counts as audited. Anything
//! journaled while a tick runs, the repair's own writes included, triggers
//! one more scan on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use keystock_core::{IntegrityReport, RepairSummary, Source};

use crate::coordinator::Coordinator;
use crate::error::{CoordError, CoordResult};

/// Outcome of the most recent audit that actually ran.
#[derive(Debug, Clone)]
pub struct AuditRun {
    pub report: IntegrityReport,
    pub repair: Option<RepairSummary>,
    pub journal_seq: i64,
}

/// Background task running scheduled audits.
pub struct AuditScheduler {
    coordinator: Coordinator,
    interval: Duration,
    auto_repair: bool,
    last_seq: Option<i64>,
    latest: Arc<RwLock<Option<AuditRun>>>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running scheduler.
#[derive(Clone)]
pub struct AuditSchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    latest: Arc<RwLock<Option<AuditRun>>>,
}

impl AuditSchedulerHandle {
    /// The last audit that ran, if any.
    pub async fn latest(&self) -> Option<AuditRun> {
        self.latest.read().await.clone()
    }

    /// Stops the scheduler after its current tick.
    pub async fn shutdown(&self) -> CoordResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| CoordError::Fatal("audit scheduler already stopped".into()))
    }
}

impl AuditScheduler {
    /// Spawns the scheduler on the current runtime.
    pub fn spawn(coordinator: Coordinator, interval: Duration, auto_repair: bool) -> AuditSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let latest = Arc::new(RwLock::new(None));

        let scheduler = AuditScheduler {
            coordinator,
            interval,
            auto_repair,
            last_seq: None,
            latest: Arc::clone(&latest),
            shutdown_rx,
        };
        tokio::spawn(scheduler.run());

        AuditSchedulerHandle { shutdown_tx, latest }
    }

    async fn run(mut self) {
        info!(interval = ?self.interval, auto_repair = self.auto_repair, "Audit scheduler starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(?e, "Scheduled audit failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Audit scheduler shutting down");
                    break;
                }
            }
        }

        info!("Audit scheduler stopped");
    }

    async fn tick(&mut self) -> CoordResult<()> {
        let journal = self.coordinator.database().journal();
        let seq = journal.latest_seq().await?;
        if self.last_seq == Some(seq) {
            debug!(seq, "No changes since last audit, skipping");
            return Ok(());
        }

        let ctx = self.coordinator.context(Source::Auditor);
        let report = self.coordinator.scan(&ctx).await?;

        let repair = if report.is_clean() || !self.auto_repair {
            if !report.is_clean() {
                warn!(findings = report.findings.len(), "Scheduled audit found drift, auto repair disabled");
            }
            None
        } else {
            let ctx = self.coordinator.context(Source::Auditor);
            Some(self.coordinator.repair(&ctx, &report).await?)
        };

        self.last_seq = Some(seq);
        let pruned = journal.prune_through(seq).await?;
        debug!(seq, pruned, "Journal pruned");
        *self.latest.write().await = Some(AuditRun {
            report,
            repair,
            journal_seq: seq,
        });
        Ok(())
    }
}

//! Deadline sweep loop
//!
//! Periodically scans the store for instances whose current level blew
//! its deadline and applies the configured timeout action through the
//! engine. Each instance is handled in isolation: one bad instance never
//! stalls the rest of the sweep, and the optimistic save inside
//! [`TransitionEngine::apply_timeout`] keeps sweeps safe to run
//! alongside live decisions (and alongside a second scheduler).

use crate::config::SweepConfig;
use crate::error::EngineResult;
use crate::transition::{TimeoutDisposition, TransitionEngine};
use approval_storage::QueryWindow;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

/// Outcome counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances the due scan returned.
    pub scanned: usize,
    pub auto_approved: usize,
    pub auto_rejected: usize,
    pub escalated: usize,
    /// Overdue with `TimeoutAction::None`; left untouched.
    pub overdue: usize,
    /// Escalations whose extension budget is spent.
    pub exhausted: usize,
    /// Resolved or extended between the scan and the check.
    pub skipped: usize,
    /// Instances whose timeout handling errored; retried next sweep.
    pub failures: usize,
}

/// Background scheduler that fires level deadlines.
pub struct TimeoutScheduler {
    engine: Arc<TransitionEngine>,
    config: SweepConfig,
    sweep_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl TimeoutScheduler {
    pub fn new(engine: Arc<TransitionEngine>, config: SweepConfig) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (sweep_tx, sweep_rx) = mpsc::channel(10);
        let scheduler = Arc::new(Self {
            engine,
            config,
            sweep_tx,
            running: Arc::new(RwLock::new(false)),
        });
        (scheduler, sweep_rx)
    }

    /// Request an immediate sweep outside the regular interval.
    pub async fn trigger_sweep(&self) {
        let _ = self.sweep_tx.send(()).await;
    }

    /// Run the sweep loop until [`TimeoutScheduler::stop`] is called.
    pub async fn start(self: Arc<Self>, mut sweep_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        tracing::info!(
            interval_secs = self.config.interval_secs,
            "timeout scheduler started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "deadline sweep failed");
                    }
                }
                Some(_) = sweep_rx.recv() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "triggered deadline sweep failed");
                    }
                }
                else => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        tracing::info!("timeout scheduler stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One sweep pass against the current wall clock.
    pub async fn sweep(&self) -> EngineResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One sweep pass against an explicit clock.
    pub async fn sweep_at(&self, now: chrono::DateTime<Utc>) -> EngineResult<SweepReport> {
        let window = QueryWindow {
            limit: self.config.batch_limit,
            offset: 0,
        };
        let due = self.engine.store().list_due_instances(now, window).await?;

        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };
        for stored in due {
            let id = stored.instance.id;
            match self.engine.apply_timeout(&id, now).await {
                Ok(TimeoutDisposition::AutoApproved) => report.auto_approved += 1,
                Ok(TimeoutDisposition::AutoRejected) => report.auto_rejected += 1,
                Ok(TimeoutDisposition::Escalated { .. }) => report.escalated += 1,
                Ok(TimeoutDisposition::Overdue) => report.overdue += 1,
                Ok(TimeoutDisposition::EscalationExhausted) => report.exhausted += 1,
                Ok(TimeoutDisposition::AlreadyResolved) | Ok(TimeoutDisposition::NotDue) => {
                    report.skipped += 1
                }
                Err(e) => {
                    tracing::warn!(
                        instance_id = %id,
                        error = %e,
                        "failed to apply timeout; will retry next sweep"
                    );
                    report.failures += 1;
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(?report, "deadline sweep finished");
        }
        Ok(report)
    }
}

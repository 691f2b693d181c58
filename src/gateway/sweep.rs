use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::{ActionRecord, LedgerError, LedgerStore, RefundOrigin, RefundOutcome};

use super::Clock;
use super::config::{GatewayConfig, RefundRetryConfig};

const SWEEP_PAGE_LIMIT: usize = 256;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: u64,
    pub refunded: u64,
    pub already_resolved: u64,
    /// Record ids that could not be resolved automatically and now require
    /// manual reconciliation.
    pub escalated: Vec<String>,
}

/// Reconciliation pass over reservations that never resolved. A crashed
/// request leaves a `Reserved` record behind; once it is older than the
/// staleness threshold the sweep refunds it. The pass is idempotent: records
/// another pass or a racing commit already resolved are skipped.
pub struct Sweeper {
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    staleness_threshold: Duration,
    interval: Duration,
    retry: RefundRetryConfig,
}

impl Sweeper {
    pub fn new(ledger: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: &GatewayConfig) -> Self {
        Self {
            ledger,
            clock,
            staleness_threshold: Duration::from_secs(config.staleness_threshold_seconds),
            interval: Duration::from_secs(config.sweep_interval_seconds),
            retry: config.refund_retry,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, LedgerError> {
        let cutoff_ms = self
            .clock
            .now_millis()
            .saturating_sub(self.staleness_threshold.as_millis() as u64);
        let mut report = SweepReport::default();
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            let page = self.ledger.stale_reservations(cutoff_ms, SWEEP_PAGE_LIMIT).await?;
            let fresh: Vec<ActionRecord> = page
                .into_iter()
                .filter(|record| attempted.insert(record.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            for record in fresh {
                report.examined += 1;
                self.resolve(record, &mut report).await;
            }
        }

        if !report.escalated.is_empty() {
            tracing::error!(
                escalated = report.escalated.len(),
                "sweep left records requiring manual reconciliation"
            );
        }
        Ok(report)
    }

    async fn resolve(&self, record: ActionRecord, report: &mut SweepReport) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.retry.base_delay_ms);

        for attempt in 1..=max_attempts {
            match self.ledger.refund(&record.id, RefundOrigin::Sweep).await {
                Ok(RefundOutcome::Refunded { new_balance }) => {
                    tracing::info!(
                        account_id = %record.account_id,
                        record_id = %record.id,
                        cost = record.cost,
                        new_balance,
                        "stale reservation refunded"
                    );
                    report.refunded += 1;
                    return;
                }
                Ok(RefundOutcome::AlreadyResolved { .. }) => {
                    report.already_resolved += 1;
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        record_id = %record.id,
                        attempt,
                        error = %err,
                        "sweep refund attempt failed"
                    );
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        match self.ledger.mark_failed(&record.id).await {
            Ok(()) => {
                tracing::error!(
                    account_id = %record.account_id,
                    record_id = %record.id,
                    cost = record.cost,
                    "reconciliation required: stale reservation parked as failed"
                );
            }
            // Another pass already parked it; still report it.
            Err(LedgerError::InvalidStateTransition { .. }) => {}
            Err(err) => {
                tracing::error!(
                    record_id = %record.id,
                    error = %err,
                    "reconciliation required: escalation failed, record still reserved"
                );
            }
        }
        report.escalated.push(record.id);
    }

    /// Runs the sweep forever on the configured interval. The first pass
    /// starts immediately.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(report) => tracing::debug!(
                    examined = report.examined,
                    refunded = report.refunded,
                    already_resolved = report.already_resolved,
                    escalated = report.escalated.len(),
                    "sweep pass complete"
                ),
                Err(err) => tracing::error!(error = %err, "sweep pass failed"),
            }
        }
    }
}

pub fn spawn_sweeper(sweeper: Sweeper) -> tokio::task::JoinHandle<()> {
    tokio::spawn(sweeper.run())
}

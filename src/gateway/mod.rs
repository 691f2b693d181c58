//! The reserve -> call -> commit/refund orchestration around the external
//! capability provider.

pub mod config;
pub mod observability;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ProviderError;
use crate::ledger::{AccountRecord, ActionRecord, LedgerError, LedgerStore, RefundOrigin};
use crate::pricing::{PricingError, PricingTable};
use crate::types::{ActionInput, ActionKind, ActionOutput};

use observability::Observability;

pub use config::{ConfigError, GatewayConfig, ProviderConfig, RefundRetryConfig};
pub use observability::ObservabilitySnapshot;
pub use sweep::{SweepReport, Sweeper, spawn_sweeper};

/// The external capability the gateway meters. Latency is unbounded and the
/// call is at-most-once per reservation: the gateway never retries it, since
/// the provider may already have incurred cost for a failed attempt.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn invoke(
        &self,
        kind: ActionKind,
        input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError>;
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown action kind: {kind}")]
    UnknownActionKind { kind: ActionKind },
    #[error("insufficient balance: balance={balance} required={required}")]
    InsufficientBalance { balance: u64, required: u64 },
    #[error("unknown account: {account_id}")]
    UnknownAccount { account_id: String },
    #[error("account inactive: {account_id}")]
    AccountInactive { account_id: String },
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
    #[error("internal invariant violation: {message}")]
    Internal { message: String },
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { balance, required } => {
                GatewayError::InsufficientBalance { balance, required }
            }
            LedgerError::UnknownAccount { account_id } => {
                GatewayError::UnknownAccount { account_id }
            }
            LedgerError::AccountInactive { account_id } => {
                GatewayError::AccountInactive { account_id }
            }
            err @ LedgerError::InvalidStateTransition { .. } => GatewayError::Internal {
                message: err.to_string(),
            },
            other => GatewayError::Ledger(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub record_id: String,
    pub output: ActionOutput,
    pub credits_charged: u64,
}

/// Orchestrates one metered action: price, reserve, call the provider, then
/// commit the debit or refund it. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct ActionGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    ledger: Arc<dyn LedgerStore>,
    provider: Arc<dyn CapabilityProvider>,
    pricing: PricingTable,
    config: GatewayConfig,
    clock: Arc<dyn Clock>,
    observability: Observability,
}

impl ActionGateway {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn CapabilityProvider>,
        config: GatewayConfig,
    ) -> Result<Self, PricingError> {
        Self::with_clock(ledger, provider, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        ledger: Arc<dyn LedgerStore>,
        provider: Arc<dyn CapabilityProvider>,
        config: GatewayConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PricingError> {
        let pricing = if config.pricing.is_empty() {
            PricingTable::default()
        } else {
            PricingTable::from_entries(&config.pricing)?
        };
        Ok(Self {
            inner: Arc::new(GatewayInner {
                ledger,
                provider,
                pricing,
                config,
                clock,
                observability: Observability::default(),
            }),
        })
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.inner.pricing
    }

    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.inner.ledger)
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.inner.observability.snapshot()
    }

    /// Provision an account with the configured starting balance.
    pub async fn provision_account(&self, account_id: &str) -> Result<AccountRecord, GatewayError> {
        Ok(self
            .inner
            .ledger
            .create_account(account_id, self.inner.config.starting_balance)
            .await?)
    }

    /// Runs one metered action end to end. Rejections (unknown kind,
    /// insufficient balance) happen before the provider is touched; once a
    /// reservation exists it always reaches a terminal ledger state, even if
    /// the returned future is dropped mid-call.
    pub async fn perform(
        &self,
        account_id: &str,
        kind: ActionKind,
        input: ActionInput,
    ) -> Result<ActionOutcome, GatewayError> {
        self.inner.observability.record_request();

        let Ok(cost) = self.inner.pricing.cost(kind) else {
            self.inner.observability.record_rejected();
            return Err(GatewayError::UnknownActionKind { kind });
        };

        let record = match self.inner.ledger.reserve(account_id, kind, cost, &input).await {
            Ok(record) => record,
            Err(err) => {
                self.inner.observability.record_rejected();
                return Err(err.into());
            }
        };
        tracing::debug!(
            account_id,
            record_id = %record.id,
            kind = %kind,
            cost,
            "action reserved"
        );

        // The call/resolve phase runs on its own task so that a caller
        // dropping this future cannot abandon the reservation.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.call_and_resolve(record, input).await });
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(GatewayError::Internal {
                message: format!("action task failed: {err}"),
            }),
        }
    }

    /// Reconciliation sweep over this gateway's ledger and staleness policy.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.inner.ledger),
            Arc::clone(&self.inner.clock),
            &self.inner.config,
        )
    }
}

impl GatewayInner {
    async fn call_and_resolve(
        &self,
        record: ActionRecord,
        input: ActionInput,
    ) -> Result<ActionOutcome, GatewayError> {
        let timeout = Duration::from_secs(self.config.provider_timeout_seconds);
        let result = match tokio::time::timeout(timeout, self.provider.invoke(record.kind, &input))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                seconds: self.config.provider_timeout_seconds,
            }),
        };

        match result {
            Ok(output) => match self.ledger.commit(&record.id, &output).await {
                Ok(()) => {
                    self.observability.record_committed();
                    Ok(ActionOutcome {
                        record_id: record.id,
                        output,
                        credits_charged: record.cost,
                    })
                }
                Err(err @ LedgerError::InvalidStateTransition { .. }) => {
                    tracing::error!(
                        account_id = %record.account_id,
                        record_id = %record.id,
                        error = %err,
                        "commit rejected"
                    );
                    Err(GatewayError::Internal {
                        message: err.to_string(),
                    })
                }
                Err(err) => {
                    // Leave the reservation in place; the sweep refunds it,
                    // so the principal is not charged for output we failed
                    // to record.
                    tracing::error!(
                        account_id = %record.account_id,
                        record_id = %record.id,
                        error = %err,
                        "commit failed, reservation left for the sweep"
                    );
                    Err(GatewayError::Ledger(err))
                }
            },
            Err(provider_err) => {
                self.observability.record_provider_failure();
                tracing::warn!(
                    account_id = %record.account_id,
                    record_id = %record.id,
                    error = %provider_err,
                    "provider call failed, refunding reservation"
                );
                self.refund_with_retry(&record).await;
                Err(GatewayError::Provider(provider_err))
            }
        }
    }

    async fn refund_with_retry(&self, record: &ActionRecord) {
        let retry = self.config.refund_retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut delay = Duration::from_millis(retry.base_delay_ms);

        for attempt in 1..=max_attempts {
            match self.ledger.refund(&record.id, RefundOrigin::Caller).await {
                Ok(_) => {
                    self.observability.record_refunded();
                    return;
                }
                Err(err @ LedgerError::InvalidStateTransition { .. }) => {
                    tracing::error!(
                        account_id = %record.account_id,
                        record_id = %record.id,
                        error = %err,
                        "refund rejected"
                    );
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        account_id = %record.account_id,
                        record_id = %record.id,
                        attempt,
                        error = %err,
                        "refund attempt failed"
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
                self.observability.record_escalated();
                tracing::error!(
                    account_id = %record.account_id,
                    record_id = %record.id,
                    cost = record.cost,
                    "refund retries exhausted, record parked for manual reconciliation"
                );
            }
            Err(err) => {
                tracing::error!(
                    account_id = %record.account_id,
                    record_id = %record.id,
                    error = %err,
                    "escalation failed, reservation left for the sweep"
                );
            }
        }
    }
}

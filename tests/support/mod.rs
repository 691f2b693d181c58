#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use creditgate::{
    AccountRecord, ActionInput, ActionKind, ActionOutput, ActionRecord, CapabilityProvider, Clock,
    HistoryCursor, HistoryPage, LedgerError, LedgerStore, MemoryLedger, ProviderError,
    RefundOrigin, RefundOutcome,
};

pub struct OkProvider;

#[async_trait]
impl CapabilityProvider for OkProvider {
    async fn invoke(
        &self,
        kind: ActionKind,
        input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError> {
        Ok(ActionOutput {
            content: format!("{kind}: {}", input.prompt),
            model: None,
            output_tokens: Some(3),
        })
    }
}

pub struct FailingProvider;

#[async_trait]
impl CapabilityProvider for FailingProvider {
    async fn invoke(
        &self,
        _kind: ActionKind,
        _input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError> {
        Err(ProviderError::InvalidResponse(
            "scripted failure".to_string(),
        ))
    }
}

/// Succeeds after a delay; lets tests drop the caller future mid-call.
pub struct SlowProvider {
    pub delay_ms: u64,
}

#[async_trait]
impl CapabilityProvider for SlowProvider {
    async fn invoke(
        &self,
        _kind: ActionKind,
        input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(ActionOutput {
            content: input.prompt.clone(),
            model: None,
            output_tokens: None,
        })
    }
}

/// Fails every third invocation, for mixed-outcome interleavings.
#[derive(Default)]
pub struct MixedProvider {
    counter: AtomicUsize,
}

#[async_trait]
impl CapabilityProvider for MixedProvider {
    async fn invoke(
        &self,
        _kind: ActionKind,
        input: &ActionInput,
    ) -> Result<ActionOutput, ProviderError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(std::time::Duration::from_millis((n % 5) as u64)).await;
        if n % 3 == 0 {
            return Err(ProviderError::InvalidResponse(
                "scripted failure".to_string(),
            ));
        }
        Ok(ActionOutput {
            content: input.prompt.clone(),
            model: None,
            output_tokens: None,
        })
    }
}

/// System time shifted forward, so freshly created reservations look stale.
pub struct OffsetClock {
    pub offset_ms: u64,
}

impl Clock for OffsetClock {
    fn now_millis(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        now.saturating_add(self.offset_ms)
    }
}

/// Delegates to a `MemoryLedger` but fails every refund, to exercise the
/// escalation path.
#[derive(Default)]
pub struct FlakyRefundLedger {
    pub inner: MemoryLedger,
}

#[async_trait]
impl LedgerStore for FlakyRefundLedger {
    async fn create_account(
        &self,
        account_id: &str,
        starting_balance: u64,
    ) -> Result<AccountRecord, LedgerError> {
        self.inner.create_account(account_id, starting_balance).await
    }

    async fn grant(&self, account_id: &str, credits: u64) -> Result<u64, LedgerError> {
        self.inner.grant(account_id, credits).await
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> Result<(), LedgerError> {
        self.inner.set_account_active(account_id, active).await
    }

    async fn account(&self, account_id: &str) -> Result<AccountRecord, LedgerError> {
        self.inner.account(account_id).await
    }

    async fn balance(&self, account_id: &str) -> Result<u64, LedgerError> {
        self.inner.balance(account_id).await
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, LedgerError> {
        self.inner.list_accounts().await
    }

    async fn reserve(
        &self,
        account_id: &str,
        kind: ActionKind,
        cost: u64,
        input: &ActionInput,
    ) -> Result<ActionRecord, LedgerError> {
        self.inner.reserve(account_id, kind, cost, input).await
    }

    async fn commit(&self, record_id: &str, output: &ActionOutput) -> Result<(), LedgerError> {
        self.inner.commit(record_id, output).await
    }

    async fn refund(
        &self,
        _record_id: &str,
        _origin: RefundOrigin,
    ) -> Result<RefundOutcome, LedgerError> {
        Err(LedgerError::Storage("injected refund failure".to_string()))
    }

    async fn mark_failed(&self, record_id: &str) -> Result<(), LedgerError> {
        self.inner.mark_failed(record_id).await
    }

    async fn history(
        &self,
        account_id: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, LedgerError> {
        self.inner.history(account_id, limit, cursor).await
    }

    async fn stale_reservations(
        &self,
        cutoff_ms: u64,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, LedgerError> {
        self.inner.stale_reservations(cutoff_ms, limit).await
    }
}

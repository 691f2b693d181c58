use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::types::{ActionInput, ActionKind, ActionOutput};

use super::{
    AccountRecord, ActionRecord, ActionStatus, HistoryCursor, HistoryPage, LedgerError,
    LedgerStore, RefundOrigin, RefundOutcome, generate_record_id, now_millis,
};

/// In-memory ledger for tests and embedding. All operations take the single
/// inner lock, which makes each of them atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, AccountRecord>,
    records: HashMap<String, ActionRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_account(
        &self,
        account_id: &str,
        starting_balance: u64,
    ) -> Result<AccountRecord, LedgerError> {
        let mut inner = self.lock();
        if inner.accounts.contains_key(account_id) {
            return Err(LedgerError::AccountExists {
                account_id: account_id.to_string(),
            });
        }
        let ts_ms = now_millis();
        let account = AccountRecord {
            id: account_id.to_string(),
            balance: starting_balance,
            active: true,
            created_at_ms: ts_ms,
            updated_at_ms: ts_ms,
        };
        inner
            .accounts
            .insert(account_id.to_string(), account.clone());
        Ok(account)
    }

    async fn grant(&self, account_id: &str, credits: u64) -> Result<u64, LedgerError> {
        let mut inner = self.lock();
        let account =
            inner
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| LedgerError::UnknownAccount {
                    account_id: account_id.to_string(),
                })?;
        account.balance = account.balance.saturating_add(credits);
        account.updated_at_ms = now_millis();
        Ok(account.balance)
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let account =
            inner
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| LedgerError::UnknownAccount {
                    account_id: account_id.to_string(),
                })?;
        account.active = active;
        account.updated_at_ms = now_millis();
        Ok(())
    }

    async fn account(&self, account_id: &str) -> Result<AccountRecord, LedgerError> {
        let inner = self.lock();
        inner
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAccount {
                account_id: account_id.to_string(),
            })
    }

    async fn balance(&self, account_id: &str) -> Result<u64, LedgerError> {
        self.account(account_id).await.map(|account| account.balance)
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, LedgerError> {
        let inner = self.lock();
        let mut accounts: Vec<AccountRecord> = inner.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn reserve(
        &self,
        account_id: &str,
        kind: ActionKind,
        cost: u64,
        input: &ActionInput,
    ) -> Result<ActionRecord, LedgerError> {
        let mut inner = self.lock();
        let account =
            inner
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| LedgerError::UnknownAccount {
                    account_id: account_id.to_string(),
                })?;
        if !account.active {
            return Err(LedgerError::AccountInactive {
                account_id: account_id.to_string(),
            });
        }
        if account.balance < cost {
            return Err(LedgerError::InsufficientBalance {
                balance: account.balance,
                required: cost,
            });
        }
        let ts_ms = now_millis();
        account.balance -= cost;
        account.updated_at_ms = ts_ms;

        let record = ActionRecord {
            id: generate_record_id(),
            account_id: account_id.to_string(),
            kind,
            cost,
            status: ActionStatus::Reserved,
            input: input.clone(),
            output: None,
            created_at_ms: ts_ms,
            resolved_at_ms: None,
        };
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn commit(&self, record_id: &str, output: &ActionOutput) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let record =
            inner
                .records
                .get_mut(record_id)
                .ok_or_else(|| LedgerError::UnknownRecord {
                    record_id: record_id.to_string(),
                })?;
        if record.status != ActionStatus::Reserved {
            return Err(LedgerError::InvalidStateTransition {
                record_id: record_id.to_string(),
                from: record.status,
                attempted: ActionStatus::Committed,
            });
        }
        record.status = ActionStatus::Committed;
        record.output = Some(output.clone());
        record.resolved_at_ms = Some(now_millis());
        Ok(())
    }

    async fn refund(
        &self,
        record_id: &str,
        origin: RefundOrigin,
    ) -> Result<RefundOutcome, LedgerError> {
        let mut inner = self.lock();
        let (status, cost, account_id) = {
            let record =
                inner
                    .records
                    .get(record_id)
                    .ok_or_else(|| LedgerError::UnknownRecord {
                        record_id: record_id.to_string(),
                    })?;
            (record.status, record.cost, record.account_id.clone())
        };
        if status != ActionStatus::Reserved {
            return match origin {
                RefundOrigin::Sweep => Ok(RefundOutcome::AlreadyResolved { status }),
                RefundOrigin::Caller => Err(LedgerError::InvalidStateTransition {
                    record_id: record_id.to_string(),
                    from: status,
                    attempted: ActionStatus::Refunded,
                }),
            };
        }
        let ts_ms = now_millis();
        let account =
            inner
                .accounts
                .get_mut(&account_id)
                .ok_or_else(|| LedgerError::UnknownAccount {
                    account_id: account_id.clone(),
                })?;
        account.balance = account.balance.saturating_add(cost);
        account.updated_at_ms = ts_ms;
        let new_balance = account.balance;

        let record = inner
            .records
            .get_mut(record_id)
            .ok_or_else(|| LedgerError::UnknownRecord {
                record_id: record_id.to_string(),
            })?;
        record.status = ActionStatus::Refunded;
        record.resolved_at_ms = Some(ts_ms);
        Ok(RefundOutcome::Refunded { new_balance })
    }

    async fn mark_failed(&self, record_id: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let record =
            inner
                .records
                .get_mut(record_id)
                .ok_or_else(|| LedgerError::UnknownRecord {
                    record_id: record_id.to_string(),
                })?;
        if record.status != ActionStatus::Reserved {
            return Err(LedgerError::InvalidStateTransition {
                record_id: record_id.to_string(),
                from: record.status,
                attempted: ActionStatus::Failed,
            });
        }
        record.status = ActionStatus::Failed;
        record.resolved_at_ms = Some(now_millis());
        Ok(())
    }

    async fn history(
        &self,
        account_id: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, LedgerError> {
        let inner = self.lock();
        if !inner.accounts.contains_key(account_id) {
            return Err(LedgerError::UnknownAccount {
                account_id: account_id.to_string(),
            });
        }
        let mut records: Vec<ActionRecord> = inner
            .records
            .values()
            .filter(|record| record.account_id == account_id)
            .filter(|record| match &cursor {
                Some(cursor) => {
                    record.created_at_ms < cursor.created_at_ms
                        || (record.created_at_ms == cursor.created_at_ms && record.id < cursor.id)
                }
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        records.truncate(limit);

        let next_cursor = if records.len() == limit && limit > 0 {
            records.last().map(|record| HistoryCursor {
                created_at_ms: record.created_at_ms,
                id: record.id.clone(),
            })
        } else {
            None
        };
        Ok(HistoryPage {
            records,
            next_cursor,
        })
    }

    async fn stale_reservations(
        &self,
        cutoff_ms: u64,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, LedgerError> {
        let inner = self.lock();
        let mut records: Vec<ActionRecord> = inner
            .records
            .values()
            .filter(|record| {
                record.status == ActionStatus::Reserved && record.created_at_ms < cutoff_ms
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        records.truncate(limit);
        Ok(records)
    }
}

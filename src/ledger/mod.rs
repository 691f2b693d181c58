//! Durable accounts and the append-only action record history.

pub mod memory;
pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionInput, ActionKind, ActionOutput};

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub balance: u64,
    pub active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Reserved,
    Committed,
    /// Automatic refund was exhausted; the debit stays in place until manual
    /// reconciliation resolves it.
    Failed,
    Refunded,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Reserved => "reserved",
            ActionStatus::Committed => "committed",
            ActionStatus::Failed => "failed",
            ActionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ActionStatus::Reserved)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown action status: {0}")]
pub struct ParseActionStatusError(String);

impl std::str::FromStr for ActionStatus {
    type Err = ParseActionStatusError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "reserved" => Ok(ActionStatus::Reserved),
            "committed" => Ok(ActionStatus::Committed),
            "failed" => Ok(ActionStatus::Failed),
            "refunded" => Ok(ActionStatus::Refunded),
            other => Err(ParseActionStatusError(other.to_string())),
        }
    }
}

/// Immutable audit fact of one metered attempt. The cost is snapshotted at
/// reservation time and the status only moves forward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub account_id: String,
    pub kind: ActionKind,
    pub cost: u64,
    pub status: ActionStatus,
    pub input: ActionInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ActionOutput>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<u64>,
}

/// Who asked for the refund. Sweep-originated refunds treat records that
/// already reached a terminal status as a no-op instead of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundOrigin {
    Caller,
    Sweep,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { new_balance: u64 },
    /// Sweep origin only: the record was already terminal, the balance was
    /// not touched.
    AlreadyResolved { status: ActionStatus },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub created_at_ms: u64,
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<HistoryCursor>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown account: {account_id}")]
    UnknownAccount { account_id: String },
    #[error("account already exists: {account_id}")]
    AccountExists { account_id: String },
    #[error("account inactive: {account_id}")]
    AccountInactive { account_id: String },
    #[error("insufficient balance: balance={balance} required={required}")]
    InsufficientBalance { balance: u64, required: u64 },
    #[error("unknown action record: {record_id}")]
    UnknownRecord { record_id: String },
    #[error("invalid state transition for record {record_id}: {from} -> {attempted}")]
    InvalidStateTransition {
        record_id: String,
        from: ActionStatus,
        attempted: ActionStatus,
    },
    #[error("corrupt ledger row for record {record_id}: {message}")]
    Corrupt { record_id: String, message: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage contract for accounts and action records. Every operation is
/// atomic: it either fully applies or leaves no effect observable to any
/// concurrent operation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_account(
        &self,
        account_id: &str,
        starting_balance: u64,
    ) -> Result<AccountRecord, LedgerError>;

    /// Administrative credit grant; returns the new balance.
    async fn grant(&self, account_id: &str, credits: u64) -> Result<u64, LedgerError>;

    async fn set_account_active(&self, account_id: &str, active: bool) -> Result<(), LedgerError>;

    async fn account(&self, account_id: &str) -> Result<AccountRecord, LedgerError>;

    async fn balance(&self, account_id: &str) -> Result<u64, LedgerError>;

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, LedgerError>;

    /// The concurrency-critical operation: the balance check and decrement
    /// are indivisible, and the `Reserved` record is inserted in the same
    /// atomic unit. Two reservations racing over the last `cost` worth of
    /// balance cannot both succeed.
    async fn reserve(
        &self,
        account_id: &str,
        kind: ActionKind,
        cost: u64,
        input: &ActionInput,
    ) -> Result<ActionRecord, LedgerError>;

    async fn commit(&self, record_id: &str, output: &ActionOutput) -> Result<(), LedgerError>;

    /// `Reserved -> Refunded`, atomically re-crediting the snapshotted cost.
    async fn refund(
        &self,
        record_id: &str,
        origin: RefundOrigin,
    ) -> Result<RefundOutcome, LedgerError>;

    /// `Reserved -> Failed`: parks the record for manual reconciliation once
    /// automatic refunds are exhausted. The debit is not re-credited.
    async fn mark_failed(&self, record_id: &str) -> Result<(), LedgerError>;

    /// Newest first, restartable via the `(created_at_ms, id)` cursor of the
    /// last returned row.
    async fn history(
        &self,
        account_id: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, LedgerError>;

    /// `Reserved` records created before the cutoff, oldest first.
    async fn stale_reservations(
        &self,
        cutoff_ms: u64,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, LedgerError>;
}

static RECORD_ID_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn generate_record_id() -> String {
    let ts_ms = now_millis();
    let mut bytes = [0u8; 6];
    if getrandom::fill(&mut bytes).is_err() {
        let seq = RECORD_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        return format!("act_{ts_ms}_{seq}");
    }
    format!("act_{ts_ms}_{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, TransactionBehavior};

use crate::types::{ActionInput, ActionKind, ActionOutput};

use super::{
    AccountRecord, ActionRecord, ActionStatus, HistoryCursor, HistoryPage, LedgerError,
    LedgerStore, RefundOrigin, RefundOutcome, generate_record_id, now_millis,
};

/// Durable ledger over a single sqlite file. Every operation opens its own
/// connection on the blocking pool and runs inside one IMMEDIATE transaction,
/// so the check-and-decrement of `reserve` serializes against concurrent
/// writers.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    path: PathBuf,
}

impl SqliteLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn create_account(
        &self,
        account_id: &str,
        starting_balance: u64,
    ) -> Result<AccountRecord, LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<AccountRecord, LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM accounts WHERE id=?1",
                    rusqlite::params![account_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(LedgerError::AccountExists { account_id });
            }

            tx.execute(
                "INSERT INTO accounts (id, balance, active, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, 1, ?3, ?3)",
                rusqlite::params![account_id, u64_to_i64(starting_balance), u64_to_i64(ts_ms)],
            )?;
            tx.commit()?;

            Ok(AccountRecord {
                id: account_id,
                balance: starting_balance,
                active: true,
                created_at_ms: ts_ms,
                updated_at_ms: ts_ms,
            })
        })
        .await?
    }

    async fn grant(&self, account_id: &str, credits: u64) -> Result<u64, LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<u64, LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let updated = tx.execute(
                "UPDATE accounts
                 SET balance = balance + ?2,
                     updated_at_ms = ?3
                 WHERE id = ?1",
                rusqlite::params![account_id, u64_to_i64(credits), u64_to_i64(ts_ms)],
            )?;
            if updated == 0 {
                return Err(LedgerError::UnknownAccount { account_id });
            }

            let balance: i64 = tx.query_row(
                "SELECT balance FROM accounts WHERE id=?1",
                rusqlite::params![account_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(i64_to_u64(balance))
        })
        .await?
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let updated = conn.execute(
                "UPDATE accounts SET active = ?2, updated_at_ms = ?3 WHERE id = ?1",
                rusqlite::params![account_id, active as i64, u64_to_i64(ts_ms)],
            )?;
            if updated == 0 {
                return Err(LedgerError::UnknownAccount { account_id });
            }
            Ok(())
        })
        .await?
    }

    async fn account(&self, account_id: &str) -> Result<AccountRecord, LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<AccountRecord, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let account = conn
                .query_row(
                    "SELECT id, balance, active, created_at_ms, updated_at_ms
                     FROM accounts WHERE id=?1",
                    rusqlite::params![account_id],
                    row_to_account,
                )
                .optional()?;
            account.ok_or(LedgerError::UnknownAccount { account_id })
        })
        .await?
    }

    async fn balance(&self, account_id: &str) -> Result<u64, LedgerError> {
        self.account(account_id).await.map(|account| account.balance)
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<AccountRecord>, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, balance, active, created_at_ms, updated_at_ms
                 FROM accounts ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_account)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await?
    }

    async fn reserve(
        &self,
        account_id: &str,
        kind: ActionKind,
        cost: u64,
        input: &ActionInput,
    ) -> Result<ActionRecord, LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let record_id = generate_record_id();
        let input = input.clone();
        let input_json = serde_json::to_string(&input)?;
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<ActionRecord, LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let row: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT balance, active FROM accounts WHERE id=?1",
                    rusqlite::params![account_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((balance, active)) = row else {
                return Err(LedgerError::UnknownAccount { account_id });
            };
            if active == 0 {
                return Err(LedgerError::AccountInactive { account_id });
            }
            let balance = i64_to_u64(balance);
            if balance < cost {
                return Err(LedgerError::InsufficientBalance {
                    balance,
                    required: cost,
                });
            }

            tx.execute(
                "UPDATE accounts
                 SET balance = balance - ?2,
                     updated_at_ms = ?3
                 WHERE id = ?1",
                rusqlite::params![account_id, u64_to_i64(cost), u64_to_i64(ts_ms)],
            )?;
            tx.execute(
                "INSERT INTO action_records
                     (id, account_id, kind, cost, status, input_json, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record_id,
                    account_id,
                    kind.as_str(),
                    u64_to_i64(cost),
                    ActionStatus::Reserved.as_str(),
                    input_json,
                    u64_to_i64(ts_ms),
                ],
            )?;
            tx.commit()?;

            Ok(ActionRecord {
                id: record_id,
                account_id,
                kind,
                cost,
                status: ActionStatus::Reserved,
                input,
                output: None,
                created_at_ms: ts_ms,
                resolved_at_ms: None,
            })
        })
        .await?
    }

    async fn commit(&self, record_id: &str, output: &ActionOutput) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let record_id = record_id.to_string();
        let output_json = serde_json::to_string(output)?;
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let raw: Option<String> = tx
                .query_row(
                    "SELECT status FROM action_records WHERE id=?1",
                    rusqlite::params![record_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(LedgerError::UnknownRecord { record_id });
            };
            let status = parse_status(&record_id, &raw)?;
            if status != ActionStatus::Reserved {
                return Err(LedgerError::InvalidStateTransition {
                    record_id,
                    from: status,
                    attempted: ActionStatus::Committed,
                });
            }

            tx.execute(
                "UPDATE action_records
                 SET status = ?2, output_json = ?3, resolved_at_ms = ?4
                 WHERE id = ?1",
                rusqlite::params![
                    record_id,
                    ActionStatus::Committed.as_str(),
                    output_json,
                    u64_to_i64(ts_ms),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn refund(
        &self,
        record_id: &str,
        origin: RefundOrigin,
    ) -> Result<RefundOutcome, LedgerError> {
        let path = self.path.clone();
        let record_id = record_id.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<RefundOutcome, LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let row: Option<(String, String, i64)> = tx
                .query_row(
                    "SELECT account_id, status, cost FROM action_records WHERE id=?1",
                    rusqlite::params![record_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((account_id, raw_status, cost)) = row else {
                return Err(LedgerError::UnknownRecord { record_id });
            };
            let status = parse_status(&record_id, &raw_status)?;
            if status != ActionStatus::Reserved {
                return match origin {
                    RefundOrigin::Sweep => Ok(RefundOutcome::AlreadyResolved { status }),
                    RefundOrigin::Caller => Err(LedgerError::InvalidStateTransition {
                        record_id,
                        from: status,
                        attempted: ActionStatus::Refunded,
                    }),
                };
            }

            tx.execute(
                "UPDATE action_records SET status = ?2, resolved_at_ms = ?3 WHERE id = ?1",
                rusqlite::params![
                    record_id,
                    ActionStatus::Refunded.as_str(),
                    u64_to_i64(ts_ms)
                ],
            )?;
            tx.execute(
                "UPDATE accounts
                 SET balance = balance + ?2,
                     updated_at_ms = ?3
                 WHERE id = ?1",
                rusqlite::params![account_id, cost.max(0), u64_to_i64(ts_ms)],
            )?;
            let new_balance: i64 = tx.query_row(
                "SELECT balance FROM accounts WHERE id=?1",
                rusqlite::params![account_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(RefundOutcome::Refunded {
                new_balance: i64_to_u64(new_balance),
            })
        })
        .await?
    }

    async fn mark_failed(&self, record_id: &str) -> Result<(), LedgerError> {
        let path = self.path.clone();
        let record_id = record_id.to_string();
        let ts_ms = now_millis();

        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let raw: Option<String> = tx
                .query_row(
                    "SELECT status FROM action_records WHERE id=?1",
                    rusqlite::params![record_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(LedgerError::UnknownRecord { record_id });
            };
            let status = parse_status(&record_id, &raw)?;
            if status != ActionStatus::Reserved {
                return Err(LedgerError::InvalidStateTransition {
                    record_id,
                    from: status,
                    attempted: ActionStatus::Failed,
                });
            }

            tx.execute(
                "UPDATE action_records SET status = ?2, resolved_at_ms = ?3 WHERE id = ?1",
                rusqlite::params![record_id, ActionStatus::Failed.as_str(), u64_to_i64(ts_ms)],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn history(
        &self,
        account_id: &str,
        limit: usize,
        cursor: Option<HistoryCursor>,
    ) -> Result<HistoryPage, LedgerError> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || -> Result<HistoryPage, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let known: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM accounts WHERE id=?1",
                    rusqlite::params![account_id],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Err(LedgerError::UnknownAccount { account_id });
            }

            let mut records = Vec::new();
            if let Some(cursor) = cursor {
                let mut stmt = conn.prepare(
                    "SELECT id, account_id, kind, cost, status, input_json, output_json,
                            created_at_ms, resolved_at_ms
                     FROM action_records
                     WHERE account_id = ?1
                       AND (created_at_ms < ?2 OR (created_at_ms = ?2 AND id < ?3))
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        account_id,
                        u64_to_i64(cursor.created_at_ms),
                        cursor.id,
                        limit_i64
                    ],
                    row_to_raw_record,
                )?;
                for row in rows {
                    records.push(raw_to_record(row?)?);
                }
            } else {
                let mut stmt = conn.prepare(
                    "SELECT id, account_id, kind, cost, status, input_json, output_json,
                            created_at_ms, resolved_at_ms
                     FROM action_records
                     WHERE account_id = ?1
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(rusqlite::params![account_id, limit_i64], row_to_raw_record)?;
                for row in rows {
                    records.push(raw_to_record(row?)?);
                }
            }

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
        })
        .await?
    }

    async fn stale_reservations(
        &self,
        cutoff_ms: u64,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, LedgerError> {
        let path = self.path.clone();
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);

        tokio::task::spawn_blocking(move || -> Result<Vec<ActionRecord>, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, account_id, kind, cost, status, input_json, output_json,
                        created_at_ms, resolved_at_ms
                 FROM action_records
                 WHERE status = 'reserved' AND created_at_ms < ?1
                 ORDER BY created_at_ms ASC, id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![u64_to_i64(cutoff_ms), limit_i64],
                row_to_raw_record,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(raw_to_record(row?)?);
            }
            Ok(out)
        })
        .await?
    }
}

type RawRecordRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
);

fn row_to_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecordRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn raw_to_record(raw: RawRecordRow) -> Result<ActionRecord, LedgerError> {
    let (id, account_id, kind, cost, status, input_json, output_json, created_at_ms, resolved) =
        raw;
    let kind = kind
        .parse::<ActionKind>()
        .map_err(|err| LedgerError::Corrupt {
            record_id: id.clone(),
            message: err.to_string(),
        })?;
    let status = parse_status(&id, &status)?;
    let input: ActionInput = serde_json::from_str(&input_json)?;
    let output: Option<ActionOutput> = match output_json {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(ActionRecord {
        id,
        account_id,
        kind,
        cost: i64_to_u64(cost),
        status,
        input,
        output,
        created_at_ms: i64_to_u64(created_at_ms),
        resolved_at_ms: resolved.map(i64_to_u64),
    })
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRecord> {
    let active: i64 = row.get(2)?;
    Ok(AccountRecord {
        id: row.get(0)?,
        balance: i64_to_u64(row.get(1)?),
        active: active != 0,
        created_at_ms: i64_to_u64(row.get(3)?),
        updated_at_ms: i64_to_u64(row.get(4)?),
    })
}

fn parse_status(record_id: &str, raw: &str) -> Result<ActionStatus, LedgerError> {
    raw.parse::<ActionStatus>()
        .map_err(|err| LedgerError::Corrupt {
            record_id: record_id.to_string(),
            message: err.to_string(),
        })
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS action_records (
            id TEXT PRIMARY KEY NOT NULL,
            account_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            cost INTEGER NOT NULL,
            status TEXT NOT NULL,
            input_json TEXT NOT NULL,
            output_json TEXT,
            created_at_ms INTEGER NOT NULL,
            resolved_at_ms INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_action_records_account_created
            ON action_records(account_id, created_at_ms DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_action_records_status_created
            ON action_records(status, created_at_ms);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger(dir: &tempfile::TempDir) -> SqliteLedger {
        SqliteLedger::new(dir.path().join("ledger.sqlite"))
    }

    #[tokio::test]
    async fn account_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");

        ledger.create_account("acct", 10).await.expect("create");
        let err = ledger.create_account("acct", 10).await;
        assert!(matches!(err, Err(LedgerError::AccountExists { .. })));

        assert_eq!(ledger.balance("acct").await.expect("balance"), 10);
        assert_eq!(ledger.grant("acct", 5).await.expect("grant"), 15);

        ledger
            .set_account_active("acct", false)
            .await
            .expect("deactivate");
        let account = ledger.account("acct").await.expect("account");
        assert!(!account.active);

        let accounts = ledger.list_accounts().await.expect("list");
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, "acct");
    }

    #[tokio::test]
    async fn reserve_enforces_balance_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");
        ledger.create_account("acct", 10).await.expect("create");

        let record = ledger
            .reserve(
                "acct",
                ActionKind::TextGeneration,
                5,
                &ActionInput::from_prompt("hi"),
            )
            .await
            .expect("reserve");
        assert_eq!(ledger.balance("acct").await.expect("balance"), 5);

        let err = ledger
            .reserve(
                "acct",
                ActionKind::ImageGeneration,
                10,
                &ActionInput::from_prompt("hi"),
            )
            .await;
        assert!(matches!(
            err,
            Err(LedgerError::InsufficientBalance {
                balance: 5,
                required: 10
            })
        ));
        assert_eq!(ledger.balance("acct").await.expect("balance"), 5);

        ledger
            .commit(
                &record.id,
                &ActionOutput {
                    content: "out".to_string(),
                    model: None,
                    output_tokens: None,
                },
            )
            .await
            .expect("commit");

        let page = ledger.history("acct", 10, None).await.expect("history");
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].status, ActionStatus::Committed);
        assert_eq!(
            page.records[0].output.as_ref().map(|o| o.content.as_str()),
            Some("out")
        );
    }

    #[tokio::test]
    async fn terminal_records_reject_further_transitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");
        ledger.create_account("acct", 10).await.expect("create");

        let record = ledger
            .reserve(
                "acct",
                ActionKind::TextSummarization,
                3,
                &ActionInput::from_prompt("hi"),
            )
            .await
            .expect("reserve");
        ledger
            .refund(&record.id, RefundOrigin::Caller)
            .await
            .expect("refund");
        assert_eq!(ledger.balance("acct").await.expect("balance"), 10);

        let err = ledger.commit(&record.id, &ActionOutput::default()).await;
        assert!(matches!(
            err,
            Err(LedgerError::InvalidStateTransition {
                from: ActionStatus::Refunded,
                attempted: ActionStatus::Committed,
                ..
            })
        ));
        let err = ledger.refund(&record.id, RefundOrigin::Caller).await;
        assert!(matches!(
            err,
            Err(LedgerError::InvalidStateTransition { .. })
        ));

        // the sweep path is idempotent against an already-refunded record
        let outcome = ledger
            .refund(&record.id, RefundOrigin::Sweep)
            .await
            .expect("sweep refund");
        assert_eq!(
            outcome,
            RefundOutcome::AlreadyResolved {
                status: ActionStatus::Refunded
            }
        );
        assert_eq!(ledger.balance("acct").await.expect("balance"), 10);
    }

    #[tokio::test]
    async fn mark_failed_parks_the_debit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");
        ledger.create_account("acct", 10).await.expect("create");

        let record = ledger
            .reserve(
                "acct",
                ActionKind::CodeGeneration,
                8,
                &ActionInput::from_prompt("hi"),
            )
            .await
            .expect("reserve");
        ledger.mark_failed(&record.id).await.expect("mark failed");
        assert_eq!(ledger.balance("acct").await.expect("balance"), 2);

        let err = ledger.refund(&record.id, RefundOrigin::Caller).await;
        assert!(matches!(
            err,
            Err(LedgerError::InvalidStateTransition {
                from: ActionStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn history_paginates_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");
        ledger.create_account("acct", 100).await.expect("create");

        let mut ids = Vec::new();
        for _ in 0..5 {
            let record = ledger
                .reserve(
                    "acct",
                    ActionKind::TextSummarization,
                    3,
                    &ActionInput::from_prompt("hi"),
                )
                .await
                .expect("reserve");
            ids.push(record.id);
        }

        let first = ledger.history("acct", 2, None).await.expect("page 1");
        assert_eq!(first.records.len(), 2);
        let cursor = first.next_cursor.clone().expect("cursor");

        let second = ledger
            .history("acct", 2, Some(cursor))
            .await
            .expect("page 2");
        assert_eq!(second.records.len(), 2);

        let mut seen: Vec<String> = first
            .records
            .iter()
            .chain(second.records.iter())
            .map(|record| record.id.clone())
            .collect();
        let third = ledger
            .history("acct", 2, second.next_cursor.clone())
            .await
            .expect("page 3");
        seen.extend(third.records.iter().map(|record| record.id.clone()));

        assert_eq!(seen.len(), 5);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5, "pagination must not repeat records");
    }

    #[tokio::test]
    async fn stale_reservations_only_lists_old_reserved_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = test_ledger(&dir);
        ledger.init().await.expect("init");
        ledger.create_account("acct", 100).await.expect("create");

        let stuck = ledger
            .reserve(
                "acct",
                ActionKind::TextGeneration,
                5,
                &ActionInput::from_prompt("hi"),
            )
            .await
            .expect("reserve");
        let resolved = ledger
            .reserve(
                "acct",
                ActionKind::TextGeneration,
                5,
                &ActionInput::from_prompt("hi"),
            )
            .await
            .expect("reserve");
        ledger
            .commit(&resolved.id, &ActionOutput::default())
            .await
            .expect("commit");

        let future_cutoff = now_millis() + 60_000;
        let stale = ledger
            .stale_reservations(future_cutoff, 10)
            .await
            .expect("stale");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, stuck.id);

        let none = ledger.stale_reservations(0, 10).await.expect("none");
        assert!(none.is_empty());
    }
}

mod support;

use std::sync::Arc;

use creditgate::{
    ActionInput, ActionKind, ActionStatus, GatewayConfig, LedgerStore, MemoryLedger, RefundOrigin,
    RefundOutcome, Sweeper, SystemClock,
};

use support::{FlakyRefundLedger, OffsetClock};

fn stale_clock(config: &GatewayConfig) -> Arc<OffsetClock> {
    Arc::new(OffsetClock {
        offset_ms: (config.staleness_threshold_seconds + 60) * 1000,
    })
}

#[tokio::test]
async fn stale_reservation_is_refunded() {
    let config = GatewayConfig::default();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.create_account("acct", 10).await.expect("create");

    // a crashed request leaves the reservation behind
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

    let sweeper = Sweeper::new(ledger.clone(), stale_clock(&config), &config);
    let report = sweeper.sweep().await.expect("sweep");
    assert_eq!(report.examined, 1);
    assert_eq!(report.refunded, 1);
    assert!(report.escalated.is_empty());

    assert_eq!(ledger.balance("acct").await.expect("balance"), 10);
    let page = ledger.history("acct", 10, None).await.expect("history");
    assert_eq!(page.records[0].status, ActionStatus::Refunded);

    // sweeping again finds nothing, and the sweep-origin refund path is a
    // no-op on the already-refunded record
    let report = sweeper.sweep().await.expect("second sweep");
    assert_eq!(report.examined, 0);
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
async fn fresh_reservations_are_left_alone() {
    let config = GatewayConfig::default();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.create_account("acct", 10).await.expect("create");
    ledger
        .reserve(
            "acct",
            ActionKind::TextGeneration,
            5,
            &ActionInput::from_prompt("hi"),
        )
        .await
        .expect("reserve");

    let sweeper = Sweeper::new(ledger.clone(), Arc::new(SystemClock), &config);
    let report = sweeper.sweep().await.expect("sweep");
    assert_eq!(report.examined, 0);

    let page = ledger.history("acct", 10, None).await.expect("history");
    assert_eq!(page.records[0].status, ActionStatus::Reserved);
    assert_eq!(ledger.balance("acct").await.expect("balance"), 5);
}

#[tokio::test]
async fn committed_and_refunded_records_are_not_swept() {
    let config = GatewayConfig::default();
    let ledger = Arc::new(MemoryLedger::new());
    ledger.create_account("acct", 20).await.expect("create");

    let committed = ledger
        .reserve(
            "acct",
            ActionKind::TextGeneration,
            5,
            &ActionInput::from_prompt("hi"),
        )
        .await
        .expect("reserve");
    ledger
        .commit(&committed.id, &Default::default())
        .await
        .expect("commit");
    let refunded = ledger
        .reserve(
            "acct",
            ActionKind::TextGeneration,
            5,
            &ActionInput::from_prompt("hi"),
        )
        .await
        .expect("reserve");
    ledger
        .refund(&refunded.id, RefundOrigin::Caller)
        .await
        .expect("refund");

    let sweeper = Sweeper::new(ledger.clone(), stale_clock(&config), &config);
    let report = sweeper.sweep().await.expect("sweep");
    assert_eq!(report.examined, 0);
    assert_eq!(ledger.balance("acct").await.expect("balance"), 15);
}

#[tokio::test]
async fn unresolvable_records_are_escalated() {
    let mut config = GatewayConfig::default();
    config.refund_retry.max_attempts = 2;
    config.refund_retry.base_delay_ms = 1;

    let ledger = Arc::new(FlakyRefundLedger::default());
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

    let sweeper = Sweeper::new(ledger.clone(), stale_clock(&config), &config);
    let report = sweeper.sweep().await.expect("sweep");
    assert_eq!(report.examined, 1);
    assert_eq!(report.refunded, 0);
    assert_eq!(report.escalated, vec![record.id.clone()]);

    // parked as failed: debit stays, record is terminal
    let page = ledger.history("acct", 10, None).await.expect("history");
    assert_eq!(page.records[0].status, ActionStatus::Failed);
    assert_eq!(ledger.balance("acct").await.expect("balance"), 5);

    // a later pass does not pick the parked record up again
    let report = sweeper.sweep().await.expect("second sweep");
    assert_eq!(report.examined, 0);
}

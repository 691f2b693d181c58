//! creditgate: credit-metered actions over a fallible external capability.
//!
//! Accounts hold credit balances; a metered action reserves its cost,
//! invokes the external provider, and commits the debit on success or
//! refunds it on failure. A reconciliation sweep resolves reservations a
//! crash left behind, so credits are never silently lost or double-charged.

mod error;

pub mod gateway;
pub mod ledger;
pub mod pricing;
pub mod providers;
pub mod types;

pub use error::ProviderError;
pub use gateway::{
    ActionGateway, ActionOutcome, CapabilityProvider, Clock, ConfigError, GatewayConfig,
    GatewayError, ObservabilitySnapshot, ProviderConfig, RefundRetryConfig, SweepReport, Sweeper,
    SystemClock, spawn_sweeper,
};
pub use ledger::{
    AccountRecord, ActionRecord, ActionStatus, HistoryCursor, HistoryPage, LedgerError,
    LedgerStore, MemoryLedger, RefundOrigin, RefundOutcome, SqliteLedger,
};
pub use pricing::{PricingError, PricingTable};
pub use providers::OpenAiCompatible;
pub use types::{ActionInput, ActionKind, ActionOutput};

pub type Result<T> = std::result::Result<T, GatewayError>;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use creditgate::{GatewayConfig, LedgerStore, SqliteLedger, Sweeper, SystemClock};

#[derive(Parser)]
#[command(name = "creditgate-admin", about = "Operate a creditgate ledger")]
struct Cli {
    /// Path to the gateway config (TOML); defaults apply when absent.
    #[arg(long, default_value = "creditgate.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger database and schema.
    Init,
    /// Provision an account with the configured starting balance.
    Provision {
        account_id: String,
        /// Override the starting balance.
        #[arg(long)]
        credits: Option<u64>,
    },
    /// Grant additional credits to an account.
    Grant { account_id: String, credits: u64 },
    /// Deactivate an account; reservations against it are rejected.
    Deactivate { account_id: String },
    /// Reactivate a deactivated account.
    Activate { account_id: String },
    Balance { account_id: String },
    Accounts,
    /// Print an account's action history, newest first, one JSON line each.
    History {
        account_id: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Refund stale reservations; --watch keeps sweeping on the configured
    /// interval.
    Sweep {
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        GatewayConfig::load(&cli.config)?
    } else {
        GatewayConfig::default()
    };

    let ledger = Arc::new(SqliteLedger::new(&config.ledger_path));
    ledger.init().await?;

    match cli.command {
        Command::Init => {
            println!("initialized ledger at {}", config.ledger_path.display());
        }
        Command::Provision {
            account_id,
            credits,
        } => {
            let starting_balance = credits.unwrap_or(config.starting_balance);
            let account = ledger.create_account(&account_id, starting_balance).await?;
            println!("provisioned {} with balance {}", account.id, account.balance);
        }
        Command::Grant {
            account_id,
            credits,
        } => {
            let balance = ledger.grant(&account_id, credits).await?;
            println!("granted {credits} to {account_id}; balance is now {balance}");
        }
        Command::Deactivate { account_id } => {
            ledger.set_account_active(&account_id, false).await?;
            println!("deactivated {account_id}");
        }
        Command::Activate { account_id } => {
            ledger.set_account_active(&account_id, true).await?;
            println!("activated {account_id}");
        }
        Command::Balance { account_id } => {
            println!("{}", ledger.balance(&account_id).await?);
        }
        Command::Accounts => {
            for account in ledger.list_accounts().await? {
                println!(
                    "{}\t{}\t{}",
                    account.id,
                    account.balance,
                    if account.active { "active" } else { "inactive" }
                );
            }
        }
        Command::History { account_id, limit } => {
            let page = ledger.history(&account_id, limit, None).await?;
            for record in page.records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Sweep { watch } => {
            let store: Arc<dyn LedgerStore> = ledger.clone();
            let sweeper = Sweeper::new(store, Arc::new(SystemClock), &config);
            if watch {
                sweeper.run().await;
            } else {
                let report = sweeper.sweep().await?;
                println!(
                    "examined={} refunded={} already_resolved={} escalated={}",
                    report.examined,
                    report.refunded,
                    report.already_resolved,
                    report.escalated.len()
                );
            }
        }
    }
    Ok(())
}

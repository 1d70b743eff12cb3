//! Payout Ledger - HTTP entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Withdraw │───▶│  Ledger  │───▶│ Payout   │───▶│ Paystack │
//! │   API    │    │ (wallet) │    │ Router   │    │ / M-Pesa │
//! └──────────┘    └────▲─────┘    └──────────┘    └────┬─────┘
//!                      │                               │
//!                 ┌────┴───────┐      webhooks         │
//!                 │ Reconciler │◀──────────────────────┘
//!                 └────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;

use payout_ledger::config::AppConfig;
use payout_ledger::db::Database;
use payout_ledger::logging::init_logging;
use payout_ledger::server::{self, build_state, payout_router};
use payout_ledger::store::{LedgerStore, MemoryStore, PgStore};
use payout_ledger::withdrawal::{RecoveryWorker, WorkerConfig};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.postgres_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.ensure_schema()
                .await
                .context("Failed to initialize ledger schema")?;
            tracing::info!("PostgreSQL ledger store ready");
            Ok(Arc::new(PgStore::new(Arc::new(db))))
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory store (state is lost on exit)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        env = %env,
        region = %config.region,
        version = env!("GIT_HASH"),
        "Starting payout ledger"
    );

    let store = open_store(&config).await?;
    let router = payout_router(&config)?;
    let state = build_state(&config, store, router)?;

    if config.recovery.enabled {
        let worker = RecoveryWorker::new(
            state.tracker.clone(),
            WorkerConfig::from(&config.recovery),
        );
        tokio::spawn(async move {
            worker.run().await;
        });
        tracing::info!("Recovery worker started");
    } else {
        tracing::warn!("Recovery worker disabled, stuck withdrawals need manual review");
    }

    let port = get_port_override().unwrap_or(config.server.port);
    server::run_server(&config.server.host, port, state).await
}

//! HTTP server
//!
//! Wires the ledger services into shared state and exposes them over axum.

pub mod handlers;
pub mod state;
pub mod types;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::account::AccountService;
use crate::config::AppConfig;
use crate::earnings::EarningsService;
use crate::payout::{MpesaGateway, PaystackGateway, PayoutRouter};
use crate::settlement::SettlementReconciler;
use crate::store::LedgerStore;
use crate::wallet::WalletLedger;
use crate::withdrawal::WithdrawalTracker;

pub use state::{AppState, Secrets};

/// Rail adapters as configured. Both rails are always registered so a
/// config change of `payout.*_rail` needs no code change.
pub fn payout_router(config: &AppConfig) -> anyhow::Result<PayoutRouter> {
    let timeout = config.payout.request_timeout();
    let paystack = PaystackGateway::new(&config.paystack, &config.payout.currency, timeout)
        .context("Failed to build Paystack client")?;
    let mpesa =
        MpesaGateway::new(&config.mpesa, timeout).context("Failed to build M-Pesa client")?;

    Ok(
        PayoutRouter::new(config.payout.mobile_rail, config.payout.bank_rail)
            .with_gateway(Arc::new(paystack))
            .with_gateway(Arc::new(mpesa)),
    )
}

/// Build every service over `store` and `router`.
pub fn build_state(
    config: &AppConfig,
    store: Arc<dyn LedgerStore>,
    router: PayoutRouter,
) -> anyhow::Result<Arc<AppState>> {
    let fees = Arc::new(config.fee_schedule().context("Invalid fee schedule")?);
    let ledger = Arc::new(WalletLedger::new(store));

    let tracker = Arc::new(WithdrawalTracker::new(
        ledger.clone(),
        fees,
        router.clone(),
        config.region.clone(),
        config.payout.transfer_reason.clone(),
    ));
    let reconciler = Arc::new(SettlementReconciler::new(ledger.clone(), &config.webhook));
    let earnings = Arc::new(EarningsService::new(
        ledger.clone(),
        config.earnings.credit_fraction_bps,
    ));
    let accounts = Arc::new(AccountService::new(ledger.clone(), router));

    Ok(Arc::new(AppState {
        ledger,
        tracker,
        reconciler,
        earnings,
        accounts,
        secrets: Secrets {
            paystack_secret: config.paystack.secret_key.clone(),
            mpesa_callback_token: config.webhook.mpesa_callback_token.clone(),
            internal_secret: config.internal_secret.clone(),
        },
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook_routes = Router::new()
        .route("/paystack", post(handlers::paystack_webhook))
        .route("/mpesa/result", post(handlers::mpesa_result))
        .route("/mpesa/timeout", post(handlers::mpesa_timeout));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/withdraw", post(handlers::create_withdrawal))
        .route("/withdrawals/{uid}", get(handlers::list_withdrawals))
        .route("/withdrawal/{reference}", get(handlers::get_withdrawal))
        .route("/wallet/pin", post(handlers::set_pin))
        .route("/wallet/{uid}", get(handlers::get_wallet))
        .route("/payout/recipient", post(handlers::register_recipient))
        .nest("/webhooks", webhook_routes);

    let internal_routes =
        Router::new().route("/earnings/booking", post(handlers::booking_transition));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/internal", internal_routes)
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} (port already in use?)", addr))?;

    tracing::info!(addr = %addr, "Payout ledger listening");
    tracing::info!("Withdraw API: POST /api/v1/withdraw");
    tracing::info!("Webhooks:     /api/v1/webhooks/{{paystack,mpesa/result,mpesa/timeout}}");

    axum::serve(listener, build_router(state))
        .await
        .context("Server error")
}

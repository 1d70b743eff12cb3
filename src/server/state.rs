use std::sync::Arc;

use crate::account::AccountService;
use crate::earnings::EarningsService;
use crate::settlement::SettlementReconciler;
use crate::wallet::WalletLedger;
use crate::withdrawal::WithdrawalTracker;

/// Shared handler state
pub struct AppState {
    pub ledger: Arc<WalletLedger>,
    pub tracker: Arc<WithdrawalTracker>,
    pub reconciler: Arc<SettlementReconciler>,
    pub earnings: Arc<EarningsService>,
    pub accounts: Arc<AccountService>,
    pub secrets: Secrets,
}

/// Shared secrets checked by the webhook and internal routes.
#[derive(Clone, Default)]
pub struct Secrets {
    /// Paystack secret key, also the webhook HMAC key
    pub paystack_secret: String,
    /// Expected `?token=` on M-Pesa callbacks; the routes are closed when `None`
    pub mpesa_callback_token: Option<String>,
    /// Expected `X-Internal-Secret`; internal routes are closed when `None`
    pub internal_secret: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("paystack_secret", &"<redacted>")
            .field("mpesa_callback_token", &self.mpesa_callback_token.as_ref().map(|_| "<redacted>"))
            .field("internal_secret", &self.internal_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

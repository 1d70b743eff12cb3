use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::core_types::{PayoutMethod, Rail};
use crate::fee::{self, FeeError, FeeSchedule, RegionFees};

/// Slack between the gateway call timeout and the recovery stale threshold.
pub const STALE_MARGIN_MS: u64 = 5_000;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    /// PostgreSQL connection URL. When absent the in-memory store is used.
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Region whose fee table applies to withdrawals.
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "fee::default_regions")]
    pub fees: HashMap<String, RegionFees>,
    #[serde(default)]
    pub payout: PayoutConfig,
    #[serde(default)]
    pub paystack: PaystackConfig,
    #[serde(default)]
    pub mpesa: MpesaConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub earnings: EarningsConfig,
    /// Shared secret for `/internal/*` routes (`X-Internal-Secret`).
    #[serde(default)]
    pub internal_secret: Option<String>,
}

fn default_region() -> String {
    fee::DEFAULT_REGION.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Which rail carries each payout method, and outbound call limits.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PayoutConfig {
    pub mobile_rail: Rail,
    pub bank_rail: Rail,
    pub request_timeout_ms: u64,
    pub currency: String,
    pub transfer_reason: String,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            mobile_rail: Rail::Paystack,
            bank_rail: Rail::Paystack,
            request_timeout_ms: 15_000,
            currency: "KES".to_string(),
            transfer_reason: "Provider withdrawal".to_string(),
        }
    }
}

impl PayoutConfig {
    pub fn rail_for(&self, method: PayoutMethod) -> Rail {
        match method {
            PayoutMethod::Mobile => self.mobile_rail,
            PayoutMethod::Bank => self.bank_rail,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaystackConfig {
    pub base_url: String,
    /// Filled from `PAYSTACK_SECRET_KEY`; also the webhook signing key.
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    /// Bank code used for mobile-money recipients when the client sends none.
    pub mobile_bank_code: String,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            mobile_bank_code: "MPESA".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub consumer_key: String,
    #[serde(default, skip_serializing)]
    pub consumer_secret: String,
    #[serde(default, skip_serializing)]
    pub security_credential: String,
    pub initiator_name: String,
    pub shortcode: String,
    pub command_id: String,
    pub result_url: String,
    pub timeout_url: String,
    pub remarks: String,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            security_credential: String::new(),
            initiator_name: "testapi".to_string(),
            shortcode: "600000".to_string(),
            command_id: "BusinessPayment".to_string(),
            result_url: "http://localhost:8080/api/v1/webhooks/mpesa/result".to_string(),
            timeout_url: "http://localhost:8080/api/v1/webhooks/mpesa/timeout".to_string(),
            remarks: "Provider withdrawal".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Attempts to find the withdrawal a webhook refers to before giving up.
    pub lookup_attempts: u32,
    /// Initial backoff between lookup attempts; doubles each retry.
    pub lookup_backoff_ms: u64,
    /// Optional `?token=` expected on M-Pesa callback URLs.
    #[serde(default, skip_serializing)]
    pub mpesa_callback_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: 3,
            lookup_backoff_ms: 200,
            mpesa_callback_token: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub pending_poll_secs: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            pending_poll_secs: 900,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EarningsConfig {
    /// Share of a booking total credited to the provider (10_000 = 100%).
    pub credit_fraction_bps: u32,
}

impl Default for EarningsConfig {
    fn default() -> Self {
        Self {
            credit_fraction_bps: 5_000,
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml` and fill secrets from the environment.
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets never live in YAML; they come from the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("DATABASE_URL") {
            self.postgres_url = Some(v);
        }
        if let Some(v) = non_empty("PAYSTACK_SECRET_KEY") {
            self.paystack.secret_key = v;
        }
        if let Some(v) = non_empty("MPESA_CONSUMER_KEY") {
            self.mpesa.consumer_key = v;
        }
        if let Some(v) = non_empty("MPESA_CONSUMER_SECRET") {
            self.mpesa.consumer_secret = v;
        }
        if let Some(v) = non_empty("MPESA_SECURITY_CREDENTIAL") {
            self.mpesa.security_credential = v;
        }
        if let Some(v) = non_empty("MPESA_CALLBACK_TOKEN") {
            self.webhook.mpesa_callback_token = Some(v);
        }
        if let Some(v) = non_empty("INTERNAL_SECRET") {
            self.internal_secret = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.fee_schedule()?;
        if self.earnings.credit_fraction_bps > 10_000 {
            anyhow::bail!(
                "earnings.credit_fraction_bps must be <= 10000, got {}",
                self.earnings.credit_fraction_bps
            );
        }
        if self.webhook.lookup_attempts == 0 {
            anyhow::bail!("webhook.lookup_attempts must be at least 1");
        }

        let uses_mpesa = [self.payout.mobile_rail, self.payout.bank_rail].contains(&Rail::Mpesa);
        let has_token = self
            .webhook
            .mpesa_callback_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if uses_mpesa && !has_token {
            anyhow::bail!("MPESA_CALLBACK_TOKEN is required when a payout rail is mpesa");
        }

        // A record still inside its gateway call must never look stale
        let stale_ms = self.recovery.stale_threshold_secs.saturating_mul(1000);
        let min_stale_ms = self.payout.request_timeout_ms.saturating_add(STALE_MARGIN_MS);
        if stale_ms < min_stale_ms {
            anyhow::bail!(
                "recovery.stale_threshold_secs ({}s) must be at least payout.request_timeout_ms + {}ms ({}ms)",
                self.recovery.stale_threshold_secs,
                STALE_MARGIN_MS,
                min_stale_ms
            );
        }
        Ok(())
    }

    pub fn fee_schedule(&self) -> Result<FeeSchedule, FeeError> {
        FeeSchedule::new(self.fees.clone())
    }
}

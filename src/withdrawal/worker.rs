//! Recovery Worker
//!
//! Background worker that resolves withdrawals the gateway never answered
//! for: INITIATING records left by a timeout, and PENDING records whose
//! webhook is overdue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::WithdrawError;
use super::tracker::WithdrawalTracker;
use super::{WithdrawalRecord, WithdrawalStatus};
use crate::config::RecoveryConfig;

/// Lookups after which an unresolved withdrawal is escalated in the logs.
const RETRY_ALERT_THRESHOLD: i32 = 10;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// Age after which an INITIATING record is looked up
    pub stale_threshold: Duration,
    /// Age after which a PENDING record is looked up
    pub pending_poll: Duration,
    /// Maximum records per status per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_threshold_secs),
            pending_poll: Duration::from_secs(config.pending_poll_secs),
            batch_size: config.batch_size,
        }
    }
}

pub struct RecoveryWorker {
    tracker: Arc<WithdrawalTracker>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(tracker: Arc<WithdrawalTracker>, config: WorkerConfig) -> Self {
        Self { tracker, config }
    }

    /// Runs forever.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            pending_poll_secs = self.config.pending_poll.as_secs(),
            "Starting withdrawal recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One scan. Returns how many withdrawals advanced.
    pub async fn scan_and_recover(&self) -> Result<usize, WithdrawError> {
        let mut candidates = self
            .stale(WithdrawalStatus::Initiating, self.config.stale_threshold)
            .await?;
        candidates.extend(
            self.stale(WithdrawalStatus::Pending, self.config.pending_poll)
                .await?,
        );

        if candidates.is_empty() {
            debug!("No unresolved withdrawals found");
            return Ok(0);
        }
        info!(count = candidates.len(), "Found unresolved withdrawals");

        let mut recovered = 0;
        for record in &candidates {
            if record.retry_count > RETRY_ALERT_THRESHOLD {
                warn!(
                    reference = %record.reference,
                    status = %record.status,
                    retry_count = record.retry_count,
                    "CRITICAL: withdrawal unresolved after many lookups"
                );
            }

            match self.tracker.resolve(record).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(reference = %record.reference, error = %e, "Failed to resolve withdrawal");
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Resolved withdrawals this scan");
        }
        Ok(recovered)
    }

    async fn stale(
        &self,
        status: WithdrawalStatus,
        age: Duration,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawError> {
        let age = chrono::Duration::seconds(age.as_secs() as i64);
        Ok(self
            .tracker
            .ledger()
            .find_stale(status, Utc::now() - age, self.config.batch_size)
            .await?)
    }
}

//! Save request receipt cleanup background job
//!
//! Receipts only need to outlive client retry windows. This job drops the
//! ones older than the configured retention so the table stays small.

use crate::services::ConversationLedger;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ReceiptCleanupConfig {
    pub enabled: bool,
    pub retention: chrono::Duration,
    pub interval: Duration,
}

impl Default for ReceiptCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: chrono::Duration::hours(168),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Run until `shutdown` fires (or its sender is dropped)
pub async fn start_receipt_cleanup(
    ledger: ConversationLedger,
    config: ReceiptCleanupConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    if !config.enabled {
        tracing::info!("Receipt cleanup disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        retention_hours = config.retention.num_hours(),
        "Starting save receipt cleanup job"
    );

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ledger.purge_expired_receipts(config.retention).await {
                    Ok(purged) => tracing::debug!(purged, "Receipt cleanup pass finished"),
                    Err(e) => tracing::warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "Receipt cleanup pass failed"
                    ),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Receipt cleanup job stopping");
                break;
            }
        }
    }
}

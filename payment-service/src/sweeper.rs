use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time;
use tracing::{debug, error};

use crate::models::WebhookEvent;
use crate::store::FulfillmentStore;

/// Reports ledger rows stuck in `processing`. Nothing is re-processed: a stuck
/// event means money was taken without a confirmed booking, which an operator
/// has to resolve.
pub struct StuckEventSweeper {
    store: Arc<dyn FulfillmentStore>,
    interval: Duration,
    threshold: chrono::Duration,
}

impl StuckEventSweeper {
    pub fn new(store: Arc<dyn FulfillmentStore>, interval: Duration, threshold: chrono::Duration) -> Self {
        Self {
            store,
            interval,
            threshold,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error checking for stuck webhook events: {}", e);
            }
        }
    }

    async fn sweep(&self) -> Result<Vec<WebhookEvent>> {
        let stuck = self.store.stuck_events(Utc::now() - self.threshold).await?;

        if stuck.is_empty() {
            debug!("No stuck webhook events");
        }
        for event in &stuck {
            error!(
                event_id = %event.event_id,
                tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
                since = %event.updated_at,
                note = event.note.as_deref().unwrap_or(""),
                "Webhook event stuck in processing, manual resolution required"
            );
        }

        Ok(stuck)
    }
}

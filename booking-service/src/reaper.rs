use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time;
use tracing::{debug, error, info};

use crate::store::ReservationStore;

/// Periodically deletes holds that expired more than `grace` ago.
///
/// Availability checks already ignore expired holds; this only keeps the
/// table small.
pub struct HoldReaper {
    store: Arc<dyn ReservationStore>,
    interval: Duration,
    grace: chrono::Duration,
}

impl HoldReaper {
    pub fn new(store: Arc<dyn ReservationStore>, interval: Duration, grace: chrono::Duration) -> Self {
        Self { store, interval, grace }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.reap_expired_holds().await {
                error!("Error reaping expired holds: {}", e);
            }
        }
    }

    async fn reap_expired_holds(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.grace;
        let deleted = self.store.delete_expired_holds(cutoff).await?;

        if deleted > 0 {
            info!("Reaped {} expired holds", deleted);
        } else {
            debug!("No expired holds to reap");
        }

        Ok(deleted)
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::BookingError;
use tracing::{error, info};

use crate::store::{ReservationStore, SlotRequest};

pub const DEFAULT_HOLD_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct HoldOutcome {
    pub conflict: bool,
    pub conflicting_table_id: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Places short-lived exclusive claims on tables while the customer pays.
///
/// Holds are never released explicitly; a hold stops counting once
/// `expires_at` has passed.
pub struct HoldManager {
    store: Arc<dyn ReservationStore>,
    hold_duration: Duration,
}

impl HoldManager {
    pub fn new(store: Arc<dyn ReservationStore>, hold_minutes: i64) -> Self {
        Self {
            store,
            hold_duration: Duration::minutes(hold_minutes),
        }
    }

    pub async fn place_hold(
        &self,
        request: &SlotRequest,
        now: DateTime<Utc>,
    ) -> Result<HoldOutcome, BookingError> {
        let expires_at = now + self.hold_duration;

        match self.store.place_holds(request, now, expires_at).await {
            Ok(Some(table_id)) => {
                info!(
                    booking_ref = %request.booking_ref,
                    "Hold refused: table {} already held on {}", table_id, request.date
                );
                Ok(HoldOutcome {
                    conflict: true,
                    conflicting_table_id: Some(table_id),
                    expires_at: None,
                })
            }
            Ok(None) => {
                info!(
                    booking_ref = %request.booking_ref,
                    tables = ?request.table_ids,
                    "Hold placed until {}", expires_at
                );
                Ok(HoldOutcome {
                    conflict: false,
                    conflicting_table_id: None,
                    expires_at: Some(expires_at),
                })
            }
            Err(e) => {
                error!(booking_ref = %request.booking_ref, error = %e, "Failed to place hold");
                Err(e.into())
            }
        }
    }
}

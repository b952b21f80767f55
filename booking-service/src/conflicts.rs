use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{BookingError, ConflictKind, TimeRange};
use tracing::{info, warn};

use crate::store::{ReservationStore, Slot, SlotRequest};

/// First requested table whose existing slot overlaps `range`.
pub fn first_overlap(table_ids: &[i32], range: TimeRange, existing: &[Slot]) -> Option<i32> {
    existing
        .iter()
        .find(|slot| table_ids.contains(&slot.table_id) && slot.range.overlaps(&range))
        .map(|slot| slot.table_id)
}

pub struct ConflictDetector {
    store: Arc<dyn ReservationStore>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Fails with `BookingError::Conflict` when a paid booking or an active hold
    /// overlaps the request. A store failure is reported as a conflict too: the
    /// slot cannot be proven free, so it is not offered.
    pub async fn check(&self, request: &SlotRequest, now: DateTime<Utc>) -> Result<(), BookingError> {
        let booked = match self.store.booked_slots(request).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(tenant_id = %request.tenant_id, error = %e, "Availability check failed, refusing slot");
                return Err(BookingError::conflict(ConflictKind::Booking, None));
            }
        };
        if let Some(table_id) = first_overlap(&request.table_ids, request.range, &booked) {
            info!("Table {} already booked on {} at {}", table_id, request.date, request.start_time);
            return Err(BookingError::conflict(ConflictKind::Booking, Some(table_id)));
        }

        let held = match self.store.active_hold_slots(request, now).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(tenant_id = %request.tenant_id, error = %e, "Hold lookup failed, refusing slot");
                return Err(BookingError::conflict(ConflictKind::Booking, None));
            }
        };
        if let Some(table_id) = first_overlap(&request.table_ids, request.range, &held) {
            info!("Table {} held by another checkout on {}", table_id, request.date);
            return Err(BookingError::conflict(ConflictKind::Hold, Some(table_id)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Duration;
    use shared::{parse_date, parse_time, PaymentStatus};
    use uuid::Uuid;

    use super::*;
    use crate::models::NewBooking;
    use crate::store::memory::MemoryStore;

    fn request(tables: Vec<i32>, start: &str) -> SlotRequest {
        SlotRequest::new(
            "t1",
            "r1",
            parse_date("2025-06-01").unwrap(),
            tables,
            parse_time(start).unwrap(),
        )
    }

    fn paid(table_id: i32, start: i32, end: i32, status: PaymentStatus) -> NewBooking {
        NewBooking {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            table_id,
            booking_date: parse_date("2025-06-01").unwrap(),
            start_time: String::new(),
            end_time: String::new(),
            start_minute: start,
            end_minute: end,
            payment_status: status.as_db().to_string(),
            customer_email: None,
            customer_name: None,
            party_size: None,
            is_manual: false,
            host_notes: None,
        }
    }

    #[test]
    fn overlap_is_limited_to_requested_tables() {
        let existing = [Slot::from((7, 600, 720))];
        assert_eq!(first_overlap(&[7], TimeRange::new(660, 780), &existing), Some(7));
        assert_eq!(first_overlap(&[8], TimeRange::new(660, 780), &existing), None);
        assert_eq!(first_overlap(&[7], TimeRange::new(720, 840), &existing), None);
    }

    #[tokio::test]
    async fn paid_booking_blocks_overlapping_request() {
        let store = Arc::new(MemoryStore::new());
        store.seed_booking(paid(5, 1140, 1260, PaymentStatus::Paid)).await;
        let detector = ConflictDetector::new(store);

        let err = detector.check(&request(vec![5], "20:00"), Utc::now()).await.unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Booking, Some(5)));
        assert!(detector.check(&request(vec![5], "21:00"), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn unpaid_booking_does_not_block() {
        let store = Arc::new(MemoryStore::new());
        store.seed_booking(paid(5, 1140, 1260, PaymentStatus::Pending)).await;
        let detector = ConflictDetector::new(store);

        assert!(detector.check(&request(vec![5], "19:00"), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn active_hold_blocks_but_expired_hold_does_not() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .place_holds(&request(vec![5], "19:00"), now, now + Duration::minutes(5))
            .await
            .unwrap();
        let detector = ConflictDetector::new(store);

        let err = detector.check(&request(vec![5], "19:30"), now).await.unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Hold, Some(5)));

        let later = now + Duration::minutes(6);
        assert!(detector.check(&request(vec![5], "19:30"), later).await.is_ok());
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads.store(true, Ordering::SeqCst);
        let detector = ConflictDetector::new(store);

        let err = detector.check(&request(vec![5], "19:00"), Utc::now()).await.unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Booking, None));
    }
}

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::conflicts::ConflictDetector;
use crate::holds::HoldManager;
use crate::models::NewBooking;
use crate::store::{ReservationStore, SlotRequest};
use crate::stripe::{CheckoutGateway, SessionRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub table_ids: Vec<i32>,
    pub email: Option<String>,
    pub booking_date: Option<String>,
    pub booking_time: Option<String>,
    #[serde(default)]
    pub total_amount_minor: i64,
    pub customer_name: Option<String>,
    pub party_size: Option<i32>,
    pub tenant_id: Option<String>,
    pub booking_ref: Option<String>,
    #[serde(default)]
    pub receive_offers: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualBookingRequest {
    pub tenant_id: String,
    pub table_ids: Vec<i32>,
    pub booking_date: String,
    pub booking_time: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub party_size: Option<i32>,
    pub host_notes: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// A checkout request that passed validation.
#[derive(Debug, Clone)]
struct ValidCheckout {
    slot: SlotRequest,
    metadata: BookingMetadata,
    email: String,
    amount_minor: i64,
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, BookingError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BookingError::Validation(format!("{field} is required")))
}

fn validate_party_size(party_size: Option<i32>) -> Result<(), BookingError> {
    match party_size {
        Some(size) if size <= 0 => Err(BookingError::Validation(
            "party_size must be positive".to_string(),
        )),
        _ => Ok(()),
    }
}

impl CheckoutRequest {
    fn validate(self) -> Result<ValidCheckout, BookingError> {
        if self.table_ids.is_empty() {
            return Err(BookingError::Validation("table_ids must not be empty".to_string()));
        }
        if self.total_amount_minor <= 0 {
            return Err(BookingError::Validation(
                "total_amount_minor must be positive".to_string(),
            ));
        }
        let email = non_empty(self.email, "email")?;
        if !email.contains('@') {
            return Err(BookingError::Validation(format!("invalid email '{email}'")));
        }
        let tenant_id = non_empty(self.tenant_id, "tenant_id")?;
        let booking_ref = non_empty(self.booking_ref, "booking_ref")?;
        let date = parse_date(&non_empty(self.booking_date, "booking_date")?)?;
        let start_time = parse_time(&non_empty(self.booking_time, "booking_time")?)?;
        booking_window(start_time)?;
        validate_party_size(self.party_size)?;

        let mut table_ids = self.table_ids;
        table_ids.sort_unstable();
        table_ids.dedup();

        let slot = SlotRequest::new(&tenant_id, &booking_ref, date, table_ids.clone(), start_time);
        let metadata = BookingMetadata {
            table_ids,
            booking_date: date,
            start_time,
            tenant_id,
            booking_ref,
            customer_name: self.customer_name.filter(|n| !n.trim().is_empty()),
            customer_email: Some(email.clone()),
            party_size: self.party_size,
            receive_offers: self.receive_offers,
        };

        Ok(ValidCheckout {
            slot,
            metadata,
            email,
            amount_minor: self.total_amount_minor,
        })
    }
}

/// Validate, check availability, hold the tables, then hand the customer
/// to the hosted payment page.
pub struct CheckoutHandler {
    store: Arc<dyn ReservationStore>,
    detector: ConflictDetector,
    holds: HoldManager,
    gateway: Arc<dyn CheckoutGateway>,
    urls: CheckoutUrls,
    currency: String,
}

impl CheckoutHandler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn CheckoutGateway>,
        hold_minutes: i64,
        urls: CheckoutUrls,
        currency: String,
    ) -> Self {
        Self {
            detector: ConflictDetector::new(store.clone()),
            holds: HoldManager::new(store.clone(), hold_minutes),
            store,
            gateway,
            urls,
            currency,
        }
    }

    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, BookingError> {
        let checkout = request.validate()?;
        let now = Utc::now();

        self.detector.check(&checkout.slot, now).await?;

        let outcome = self.holds.place_hold(&checkout.slot, now).await?;
        if outcome.conflict {
            return Err(BookingError::conflict(
                ConflictKind::Hold,
                outcome.conflicting_table_id,
            ));
        }

        let session_request = SessionRequest {
            amount_minor: checkout.amount_minor,
            currency: self.currency.clone(),
            customer_email: checkout.email.clone(),
            description: format!(
                "Table reservation {} {}",
                format_date(checkout.metadata.booking_date),
                format_time(checkout.metadata.start_time)
            ),
            metadata: checkout.metadata.to_pairs(),
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        };

        let session = self
            .gateway
            .create_session(&session_request)
            .await
            .map_err(|e| {
                error!(booking_ref = %checkout.metadata.booking_ref, "Checkout session failed: {}", e);
                BookingError::PaymentProvider(e.to_string())
            })?;

        info!(
            tenant_id = %checkout.metadata.tenant_id,
            booking_ref = %checkout.metadata.booking_ref,
            session_id = %session.id,
            "Checkout session created"
        );

        if let Err(e) = self
            .store
            .record_checkout_started(&checkout.metadata.booking_ref, &checkout.metadata.tenant_id)
            .await
        {
            warn!(booking_ref = %checkout.metadata.booking_ref, "Failed to record checkout tracking: {}", e);
        }

        Ok(CheckoutResponse { url: session.url })
    }

    /// Staff-entered booking; occupies its tables exactly like a paid one.
    pub async fn create_manual_booking(
        &self,
        request: ManualBookingRequest,
    ) -> Result<Vec<Uuid>, BookingError> {
        let tenant_id = non_empty(Some(request.tenant_id), "tenant_id")?;
        let mut table_ids = request.table_ids;
        table_ids.sort_unstable();
        table_ids.dedup();
        if table_ids.is_empty() {
            return Err(BookingError::Validation("table_ids must not be empty".to_string()));
        }
        validate_party_size(request.party_size)?;
        let date = parse_date(&request.booking_date)?;
        let start_time = parse_time(&request.booking_time)?;
        booking_window(start_time)?;
        let slot = SlotRequest::new(tenant_id, "", date, table_ids, start_time);

        let rows: Vec<NewBooking> = slot
            .table_ids
            .iter()
            .map(|table_id| NewBooking {
                id: Uuid::new_v4(),
                tenant_id: slot.tenant_id.clone(),
                table_id: *table_id,
                booking_date: date,
                start_time: format_time(slot.start_time),
                end_time: format_time(slot.end_time),
                start_minute: slot.range.start,
                end_minute: slot.range.end,
                payment_status: PaymentStatus::Paid.as_db().to_string(),
                customer_email: request.customer_email.clone(),
                customer_name: request.customer_name.clone(),
                party_size: request.party_size,
                is_manual: true,
                host_notes: request.host_notes.clone(),
            })
            .collect();
        let ids = rows.iter().map(|row| row.id).collect();

        if let Some(table_id) = self.store.insert_manual_bookings(&slot, rows, Utc::now()).await? {
            info!(tenant_id = %slot.tenant_id, "Manual booking refused: table {} held by a checkout", table_id);
            return Err(BookingError::conflict(ConflictKind::Hold, Some(table_id)));
        }
        info!(tenant_id = %slot.tenant_id, tables = ?slot.table_ids, "Manual booking created for {}", date);

        Ok(ids)
    }

    pub async fn list_bookings(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<crate::models::Booking>, BookingError> {
        Ok(self.store.list_bookings(tenant_id, date).await?)
    }

    /// Returns `false` when no booking with that id belongs to the tenant.
    pub async fn delete_booking(&self, booking_id: Uuid, tenant_id: &str) -> Result<bool, BookingError> {
        let deleted = self.store.delete_booking(booking_id, tenant_id).await?;
        if deleted {
            info!(tenant_id = %tenant_id, "Booking {} deleted", booking_id);
        } else {
            warn!(tenant_id = %tenant_id, "Booking {} not found for tenant", booking_id);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::stripe::fake::FakeGateway;

    pub fn checkout_request(tables: Vec<i32>, start: &str) -> CheckoutRequest {
        CheckoutRequest {
            table_ids: tables,
            email: Some("a@b.com".to_string()),
            booking_date: Some("2025-06-01".to_string()),
            booking_time: Some(start.to_string()),
            total_amount_minor: 1000,
            customer_name: Some("Ada".to_string()),
            party_size: Some(2),
            tenant_id: Some("t1".to_string()),
            booking_ref: Some("r1".to_string()),
            receive_offers: false,
        }
    }

    pub fn handler(store: Arc<MemoryStore>, gateway: Arc<FakeGateway>) -> CheckoutHandler {
        CheckoutHandler::new(
            store,
            gateway,
            5,
            CheckoutUrls {
                success_url: "https://example.test/success".to_string(),
                cancel_url: "https://example.test/cancel".to_string(),
            },
            "eur".to_string(),
        )
    }

    #[tokio::test]
    async fn overlapping_second_checkout_gets_hold_conflict() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let handler = handler(store.clone(), gateway.clone());

        let first = handler
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap();
        assert_eq!(first.url, "https://checkout.test/cs_test_1");

        let err = handler
            .create_checkout_session(checkout_request(vec![5], "19:30"))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Hold, Some(5)));
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);
        assert_eq!(store.state.lock().await.holds.len(), 1);
    }

    #[tokio::test]
    async fn session_metadata_carries_booking_facts() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let handler = handler(store.clone(), gateway.clone());

        handler
            .create_checkout_session(checkout_request(vec![6, 5, 6], "19:00"))
            .await
            .unwrap();

        let requests = gateway.requests.lock().unwrap();
        let metadata = &requests[0].metadata;
        let get = |k: &str| metadata.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("table_ids").as_deref(), Some("5,6"));
        assert_eq!(get("tenant_id").as_deref(), Some("t1"));
        assert_eq!(get("booking_ref").as_deref(), Some("r1"));
        assert_eq!(get("end_time").as_deref(), Some("21:00"));
        assert_eq!(requests[0].amount_minor, 1000);
        assert_eq!(store.state.lock().await.tracking, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn paid_booking_yields_plain_conflict() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let handler = handler(store.clone(), gateway.clone());

        handler
            .create_manual_booking(ManualBookingRequest {
                tenant_id: "t1".to_string(),
                table_ids: vec![5],
                booking_date: "2025-06-01".to_string(),
                booking_time: "18:00".to_string(),
                customer_name: None,
                customer_email: None,
                party_size: None,
                host_notes: Some("walk-in".to_string()),
            })
            .await
            .unwrap();

        let err = handler
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Booking, Some(5)));
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_hold() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));

        let no_tables = checkout_request(vec![], "19:00");
        let mut free = checkout_request(vec![5], "19:00");
        free.total_amount_minor = 0;
        let mut anonymous = checkout_request(vec![5], "19:00");
        anonymous.email = None;
        let mut untraceable = checkout_request(vec![5], "19:00");
        untraceable.booking_ref = Some(" ".to_string());
        let bad_time = checkout_request(vec![5], "7pm");

        for request in [no_tables, free, anonymous, untraceable, bad_time] {
            let err = handler.create_checkout_session(request).await.unwrap_err();
            assert!(matches!(err, BookingError::Validation(_)), "got {err:?}");
        }
        assert!(store.state.lock().await.holds.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_after_hold() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway {
            reject: true,
            ..Default::default()
        });
        let handler = handler(store.clone(), gateway);

        let err = handler
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::PaymentProvider(_)));
        // The hold simply expires.
        assert_eq!(store.state.lock().await.holds.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_manual_booking_is_rejected_whole() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));
        let request = |tables: Vec<i32>, time: &str| ManualBookingRequest {
            tenant_id: "t1".to_string(),
            table_ids: tables,
            booking_date: "2025-06-01".to_string(),
            booking_time: time.to_string(),
            customer_name: Some("Grace".to_string()),
            customer_email: None,
            party_size: Some(6),
            host_notes: None,
        };

        handler.create_manual_booking(request(vec![2], "12:00")).await.unwrap();
        let err = handler
            .create_manual_booking(request(vec![1, 2], "13:00"))
            .await
            .unwrap_err();

        assert_eq!(err, BookingError::conflict(ConflictKind::Booking, None));
        assert_eq!(store.state.lock().await.bookings.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_owning_tenant() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));
        let ids = handler
            .create_manual_booking(ManualBookingRequest {
                tenant_id: "t1".to_string(),
                table_ids: vec![3],
                booking_date: "2025-06-01".to_string(),
                booking_time: "12:00".to_string(),
                customer_name: None,
                customer_email: None,
                party_size: None,
                host_notes: None,
            })
            .await
            .unwrap();

        assert!(!handler.delete_booking(ids[0], "t2").await.unwrap());
        assert_eq!(store.state.lock().await.bookings.len(), 1);

        assert!(handler.delete_booking(ids[0], "t1").await.unwrap());
        assert!(store.state.lock().await.bookings.is_empty());
    }

    fn manual(tables: Vec<i32>, date: &str, time: &str) -> ManualBookingRequest {
        ManualBookingRequest {
            tenant_id: "t1".to_string(),
            table_ids: tables,
            booking_date: date.to_string(),
            booking_time: time.to_string(),
            customer_name: None,
            customer_email: None,
            party_size: None,
            host_notes: None,
        }
    }

    #[tokio::test]
    async fn manual_booking_respects_active_hold() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));

        handler
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap();
        let err = handler
            .create_manual_booking(manual(vec![4, 5], "2025-06-01", "19:30"))
            .await
            .unwrap_err();

        assert_eq!(err, BookingError::conflict(ConflictKind::Hold, Some(5)));
        assert!(store.state.lock().await.bookings.is_empty());
        assert!(handler
            .create_manual_booking(manual(vec![5], "2025-06-01", "21:00"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn retry_with_same_reference_renews_its_own_hold() {
        let store = Arc::new(MemoryStore::new());
        let declining = handler(
            store.clone(),
            Arc::new(FakeGateway {
                reject: true,
                ..Default::default()
            }),
        );
        let err = declining
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::PaymentProvider(_)));
        let first_expiry = store.state.lock().await.holds[0].expires_at;

        let retry = handler(store.clone(), Arc::new(FakeGateway::default()))
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap();
        assert!(retry.url.starts_with("https://checkout.test/"));

        let state = store.state.lock().await;
        assert_eq!(state.holds.len(), 1);
        assert!(state.holds[0].expires_at >= first_expiry);
    }

    #[tokio::test]
    async fn other_reference_on_held_window_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));

        handler
            .create_checkout_session(checkout_request(vec![5], "19:00"))
            .await
            .unwrap();
        let mut other_customer = checkout_request(vec![5], "19:00");
        other_customer.booking_ref = Some("r2".to_string());

        let err = handler.create_checkout_session(other_customer).await.unwrap_err();
        assert_eq!(err, BookingError::conflict(ConflictKind::Hold, Some(5)));
    }

    #[tokio::test]
    async fn windows_running_past_midnight_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));

        let err = handler
            .create_manual_booking(manual(vec![5], "2025-06-01", "23:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)), "got {err:?}");

        let err = handler
            .create_checkout_session(checkout_request(vec![5], "22:30"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)), "got {err:?}");
        assert!(store.state.lock().await.holds.is_empty());

        let mut early = checkout_request(vec![5], "00:30");
        early.booking_date = Some("2025-06-02".to_string());
        assert!(handler.create_checkout_session(early).await.is_ok());
    }

    #[tokio::test]
    async fn manual_booking_dedups_tables_and_needs_tenant() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(FakeGateway::default()));

        let ids = handler
            .create_manual_booking(manual(vec![2, 2], "2025-06-01", "12:00"))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let mut anonymous = manual(vec![3], "2025-06-01", "12:00");
        anonymous.tenant_id = "  ".to_string();
        let err = handler.create_manual_booking(anonymous).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(store.state.lock().await.bookings.len(), 1);
    }
}

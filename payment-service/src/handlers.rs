use std::sync::Arc;

use futures::future::join_all;
use shared::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::{split_amount, CompletedCheckout, ProviderEvent, CHECKOUT_COMPLETED};
use crate::models::*;
use crate::notifier::{BookingSummary, Notification, Notifier};
use crate::signature::{verify_signature, SignatureError};
use crate::store::FulfillmentStore;

pub const MISSING_METADATA_NOTE: &str = "missing_metadata";
pub const CONSENT_TEXT: &str = "Customer opted in to receive offers at checkout";

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Event type that does not trigger fulfillment.
    Ignored,
    /// Event id already in the ledger; nothing was repeated.
    Duplicate,
    /// Envelope or metadata cannot identify a reservation; acknowledged so the
    /// provider stops retrying.
    Malformed,
    Fulfilled { bookings: usize },
    PartiallyFulfilled { failed_tables: Vec<i32> },
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Malformed => "malformed",
            WebhookOutcome::Fulfilled { .. } => "fulfilled",
            WebhookOutcome::PartiallyFulfilled { .. } => "partially_fulfilled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_secs: i64,
    pub staff_email: String,
}

pub struct WebhookHandler {
    store: Arc<dyn FulfillmentStore>,
    notifier: Arc<dyn Notifier>,
    config: WebhookConfig,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        notifier: Arc<dyn Notifier>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Processes one delivery. `payload` must be the raw request body.
    ///
    /// Errors are returned only for bad signatures and store failures before
    /// the event is claimed. A verified body that cannot be read is acknowledged.
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookOutcome, BookingError> {
        let header = signature.ok_or_else(|| BookingError::Signature(SignatureError::MissingHeader.to_string()))?;
        verify_signature(payload, header, &self.config.secret, now, self.config.tolerance_secs)
            .map_err(|e| BookingError::Signature(e.to_string()))?;

        let event: ProviderEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => return self.acknowledge_unreadable(payload, e).await,
        };

        if event.event_type != CHECKOUT_COMPLETED {
            debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        if let Some(status) = self.store.event_status(&event.id).await? {
            info!(event_id = %event.id, status = status.as_db(), "Duplicate webhook event, skipping");
            return Ok(WebhookOutcome::Duplicate);
        }

        let checkout = match CompletedCheckout::from_event(&event) {
            Ok(checkout) => checkout,
            Err(e) => {
                return self
                    .acknowledge_malformed(&event.id, &event.event_type, None, format!("invalid_object: {e}"))
                    .await
            }
        };

        let metadata = match BookingMetadata::from_map(&checkout.metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                let tenant_id = checkout
                    .metadata
                    .get(metadata_keys::TENANT_ID)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let note = if is_untraceable(&e) {
                    MISSING_METADATA_NOTE.to_string()
                } else {
                    format!("invalid_metadata: {e}")
                };
                return self
                    .acknowledge_malformed(&event.id, &event.event_type, tenant_id, note)
                    .await;
            }
        };

        let claimed = self
            .store
            .claim_event(NewWebhookEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                tenant_id: Some(metadata.tenant_id.clone()),
                status: EventStatus::Processing.as_db().to_string(),
            })
            .await?;
        if !claimed {
            info!(event_id = %event.id, "Webhook event claimed by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let failed_tables = self.insert_bookings(&checkout, &metadata).await;

        let outcome = if failed_tables.is_empty() {
            self.finish(&event.id, EventStatus::Completed, None).await;
            info!(
                event_id = %event.id,
                booking_ref = %metadata.booking_ref,
                tables = ?metadata.table_ids,
                "Booking fulfilled"
            );
            WebhookOutcome::Fulfilled {
                bookings: metadata.table_ids.len(),
            }
        } else {
            let partial = BookingError::PartialFulfillment {
                booking_ref: metadata.booking_ref.clone(),
                failed_tables: failed_tables.clone(),
            };
            error!(event_id = %event.id, tenant_id = %metadata.tenant_id, "{}", partial);
            self.finish(&event.id, EventStatus::Processing, Some(failed_tables_note(&failed_tables)))
                .await;
            WebhookOutcome::PartiallyFulfilled {
                failed_tables: failed_tables.clone(),
            }
        };

        self.update_tracking(&checkout, &metadata).await;
        self.dispatch_notifications(&checkout, &metadata, &failed_tables).await;

        Ok(outcome)
    }

    /// One independent insert per table; returns the tables that could not be booked.
    async fn insert_bookings(&self, checkout: &CompletedCheckout, metadata: &BookingMetadata) -> Vec<i32> {
        let range = metadata.range();
        let start_time = format_time(metadata.start_time);
        let end_time = format_time(metadata.end_time());
        let shares = checkout
            .amount_total
            .map(|total| split_amount(total, metadata.table_ids.len()));

        let mut failed = Vec::new();
        for (i, table_id) in metadata.table_ids.iter().enumerate() {
            let row = NewPaidBooking {
                id: Uuid::new_v4(),
                tenant_id: metadata.tenant_id.clone(),
                table_id: *table_id,
                booking_date: metadata.booking_date,
                start_time: start_time.clone(),
                end_time: end_time.clone(),
                start_minute: range.start,
                end_minute: range.end,
                payment_status: PaymentStatus::Paid.as_db().to_string(),
                stripe_order_id: Some(checkout.order_reference()),
                booking_ref: Some(metadata.booking_ref.clone()),
                customer_email: customer_email(checkout, metadata),
                customer_name: metadata.customer_name.clone(),
                party_size: metadata.party_size,
                total_amount: shares.as_ref().map(|s| s[i]),
                receive_offers: metadata.receive_offers,
            };

            match self.store.insert_paid_booking(row).await {
                Ok(()) => {}
                Err(StoreError::Overlap) => {
                    warn!(
                        booking_ref = %metadata.booking_ref,
                        table_id = table_id,
                        "Table already booked for this slot"
                    );
                    failed.push(*table_id);
                }
                Err(e) => {
                    error!(booking_ref = %metadata.booking_ref, table_id = table_id, "Booking insert failed: {}", e);
                    failed.push(*table_id);
                }
            }
        }
        failed
    }

    async fn acknowledge_malformed(
        &self,
        event_id: &str,
        event_type: &str,
        tenant_id: Option<String>,
        note: String,
    ) -> Result<WebhookOutcome, BookingError> {
        error!(event_id = %event_id, note = %note, "Paid checkout cannot be traced to a reservation");

        let claimed = self
            .store
            .claim_event(NewWebhookEvent {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                tenant_id,
                status: EventStatus::Processing.as_db().to_string(),
            })
            .await?;
        if claimed {
            self.finish(event_id, EventStatus::Completed, Some(note)).await;
        }
        Ok(WebhookOutcome::Malformed)
    }

    /// The body passed signature checks, so a rejection would only be retried
    /// with the same bytes. Records it when an event id can still be read.
    async fn acknowledge_unreadable(
        &self,
        payload: &[u8],
        err: serde_json::Error,
    ) -> Result<WebhookOutcome, BookingError> {
        let note = format!("invalid_envelope: {err}");
        let envelope = serde_json::from_slice::<serde_json::Value>(payload).ok();
        let event_id = envelope
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty());

        let Some(event_id) = event_id else {
            error!(note = %note, "Verified webhook body has no readable event id");
            return Ok(WebhookOutcome::Malformed);
        };
        let event_type = envelope
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        self.acknowledge_malformed(event_id, event_type, None, note).await
    }

    async fn finish(&self, event_id: &str, status: EventStatus, note: Option<String>) {
        if let Err(e) = self.store.finish_event(event_id, status, note).await {
            error!(event_id = %event_id, "Failed to update webhook ledger: {}", e);
        }
    }

    async fn update_tracking(&self, checkout: &CompletedCheckout, metadata: &BookingMetadata) {
        let tracking = CheckoutPaid {
            booking_ref: metadata.booking_ref.clone(),
            tenant_id: metadata.tenant_id.clone(),
            checkout_completed: true,
            payment_succeeded: true,
        };
        if let Err(e) = self.store.mark_checkout_paid(tracking).await {
            warn!(booking_ref = %metadata.booking_ref, "Checkout tracking update failed: {}", e);
        }

        if !metadata.receive_offers {
            return;
        }
        let Some(email) = customer_email(checkout, metadata) else {
            return;
        };
        let optin = MarketingOptin {
            email,
            tenant_id: metadata.tenant_id.clone(),
            consent_text: CONSENT_TEXT.to_string(),
            is_subscribed: true,
        };
        if let Err(e) = self.store.upsert_marketing_optin(optin).await {
            warn!(booking_ref = %metadata.booking_ref, "Marketing opt-in upsert failed: {}", e);
        }
    }

    async fn dispatch_notifications(
        &self,
        checkout: &CompletedCheckout,
        metadata: &BookingMetadata,
        failed_tables: &[i32],
    ) {
        let booking = summary(checkout, metadata);
        let staff_email = self.config.staff_email.clone();

        let notifications = if failed_tables.is_empty() {
            let mut list = vec![Notification::StaffBooking {
                staff_email,
                booking: booking.clone(),
            }];
            if let Some(customer_email) = booking.customer_email.clone() {
                list.push(Notification::CustomerConfirmation {
                    customer_email,
                    booking,
                });
            }
            list
        } else {
            vec![Notification::UnfulfilledAlert {
                staff_email,
                booking,
                failed_tables: failed_tables.to_vec(),
            }]
        };

        let results = join_all(notifications.iter().map(|n| self.notifier.notify(n))).await;
        for (notification, result) in notifications.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    booking_ref = %metadata.booking_ref,
                    kind = notification.kind(),
                    "Notification failed: {}",
                    e
                );
            }
        }
    }
}

/// Without tenant or booking reference the payment cannot be matched to anything.
fn is_untraceable(err: &BookingError) -> bool {
    matches!(
        err,
        BookingError::MissingMetadata(key)
            if *key == metadata_keys::TENANT_ID || *key == metadata_keys::BOOKING_REF
    )
}

fn failed_tables_note(failed_tables: &[i32]) -> String {
    let tables = failed_tables
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("unfulfilled tables: {tables}")
}

fn customer_email(checkout: &CompletedCheckout, metadata: &BookingMetadata) -> Option<String> {
    metadata
        .customer_email
        .clone()
        .or_else(|| checkout.customer_email.clone())
}

fn summary(checkout: &CompletedCheckout, metadata: &BookingMetadata) -> BookingSummary {
    BookingSummary {
        tenant_id: metadata.tenant_id.clone(),
        booking_ref: metadata.booking_ref.clone(),
        table_ids: metadata.table_ids.clone(),
        booking_date: format_date(metadata.booking_date),
        start_time: format_time(metadata.start_time),
        end_time: format_time(metadata.end_time()),
        customer_name: metadata.customer_name.clone(),
        customer_email: customer_email(checkout, metadata),
        party_size: metadata.party_size,
        amount_minor: checkout.amount_total,
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::{json, Value};

    use super::*;
    use crate::notifier::recording::RecordingNotifier;
    use crate::signature::sign;
    use crate::store::memory::MemoryStore;

    pub const SECRET: &str = "whsec_test";
    pub const NOW: i64 = 1_750_000_000;

    pub fn completed_event(event_id: &str, metadata: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_test_1",
                "amount_total": 1000,
                "customer_email": "a@b.com",
                "metadata": metadata
            }}
        }))
        .unwrap()
    }

    pub fn two_table_metadata() -> Value {
        json!({
            "table_ids": "5,6",
            "booking_date": "2025-06-01",
            "booking_time": "19:00",
            "tenant_id": "t1",
            "booking_ref": "r1"
        })
    }

    pub fn handler(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> WebhookHandler {
        WebhookHandler::new(
            store,
            notifier,
            WebhookConfig {
                secret: SECRET.to_string(),
                tolerance_secs: 300,
                staff_email: "staff@example.test".to_string(),
            },
        )
    }

    async fn deliver(handler: &WebhookHandler, body: &[u8]) -> Result<WebhookOutcome, BookingError> {
        let header = sign(body, SECRET, NOW);
        handler.handle_event(body, Some(&header), NOW).await
    }

    #[tokio::test]
    async fn redelivery_fulfills_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = handler(store.clone(), notifier.clone());
        let body = completed_event("evt_1", two_table_metadata());

        let first = deliver(&handler, &body).await.unwrap();
        assert_eq!(first, WebhookOutcome::Fulfilled { bookings: 2 });
        assert_eq!(store.state.lock().await.bookings.len(), 2);
        assert_eq!(notifier.kinds(), vec!["staff_booking", "customer_confirmation"]);

        let second = deliver(&handler, &body).await.unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate);
        assert_eq!(store.state.lock().await.bookings.len(), 2);
        assert_eq!(notifier.kinds().len(), 2);

        let ledger = store.event("evt_1").await.unwrap();
        assert_eq!(ledger.status, "completed");
        assert_eq!(ledger.tenant_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn rows_carry_paid_status_and_split_amount() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));

        deliver(&handler, &completed_event("evt_1", two_table_metadata())).await.unwrap();

        let state = store.state.lock().await;
        let row = &state.bookings[0];
        assert_eq!(row.payment_status, "PAID");
        assert_eq!(row.end_time, "21:00");
        assert_eq!((row.start_minute, row.end_minute), (1140, 1260));
        assert_eq!(row.stripe_order_id.as_deref(), Some("pi_test_1"));
        assert_eq!(row.customer_email.as_deref(), Some("a@b.com"));
        let total: i64 = state.bookings.iter().filter_map(|b| b.total_amount).sum();
        assert_eq!(total, 1000);
        assert_eq!(state.tracking.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_table_alerts_staff_and_withholds_confirmation() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = handler(store.clone(), notifier.clone());

        let mut rival = two_table_metadata();
        rival["table_ids"] = json!("6");
        rival["booking_time"] = json!("20:00");
        rival["booking_ref"] = json!("r0");
        deliver(&handler, &completed_event("evt_0", rival)).await.unwrap();
        notifier.sent.lock().unwrap().clear();

        let outcome = deliver(&handler, &completed_event("evt_1", two_table_metadata()))
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::PartiallyFulfilled { failed_tables: vec![6] });
        assert_eq!(notifier.kinds(), vec!["unfulfilled_alert"]);

        let ledger = store.event("evt_1").await.unwrap();
        assert_eq!(ledger.status, "processing");
        assert_eq!(ledger.note.as_deref(), Some("unfulfilled tables: 6"));
        let booked_for_r1 = store
            .state
            .lock()
            .await
            .bookings
            .iter()
            .filter(|b| b.booking_ref.as_deref() == Some("r1"))
            .count();
        assert_eq!(booked_for_r1, 1);
    }

    #[tokio::test]
    async fn missing_tenant_is_acknowledged_and_recorded() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = handler(store.clone(), notifier.clone());

        let mut metadata = two_table_metadata();
        metadata.as_object_mut().unwrap().remove("tenant_id");
        let outcome = deliver(&handler, &completed_event("evt_1", metadata)).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Malformed);
        let ledger = store.event("evt_1").await.unwrap();
        assert_eq!(ledger.status, "completed");
        assert_eq!(ledger.note.as_deref(), Some(MISSING_METADATA_NOTE));
        assert!(store.state.lock().await.bookings.is_empty());
        assert!(notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));
        let body = completed_event("evt_1", two_table_metadata());
        let header = sign(&body, "whsec_wrong", NOW);

        let err = handler.handle_event(&body, Some(&header), NOW).await.unwrap_err();
        assert!(matches!(err, BookingError::Signature(_)));

        let err = handler.handle_event(&body, None, NOW).await.unwrap_err();
        assert!(matches!(err, BookingError::Signature(_)));
        assert!(store.state.lock().await.events.is_empty());
    }

    #[tokio::test]
    async fn other_event_types_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));
        let body = serde_json::to_vec(&json!({ "id": "evt_9", "type": "payment_intent.created" })).unwrap();

        assert_eq!(deliver(&handler, &body).await.unwrap(), WebhookOutcome::Ignored);
        assert!(store.state.lock().await.events.is_empty());
    }

    #[tokio::test]
    async fn ledger_outage_is_transient() {
        let store = Arc::new(MemoryStore::new());
        store.fail_ledger.store(true, Ordering::SeqCst);
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));

        let err = deliver(&handler, &completed_event("evt_1", two_table_metadata()))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::TransientStore(_)));
    }

    #[tokio::test]
    async fn best_effort_failures_do_not_change_the_outcome() {
        let store = Arc::new(MemoryStore::new());
        store.fail_tracking.store(true, Ordering::SeqCst);
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail.store(true, Ordering::SeqCst);
        let handler = handler(store.clone(), notifier.clone());

        let outcome = deliver(&handler, &completed_event("evt_1", two_table_metadata()))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Fulfilled { bookings: 2 });
        assert_eq!(store.event("evt_1").await.unwrap().status, "completed");
    }

    #[tokio::test]
    async fn opted_in_customer_is_upserted_once() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));

        let mut metadata = two_table_metadata();
        metadata["receive_offers"] = json!("true");
        deliver(&handler, &completed_event("evt_1", metadata.clone())).await.unwrap();
        metadata["booking_time"] = json!("12:00");
        metadata["booking_ref"] = json!("r2");
        deliver(&handler, &completed_event("evt_2", metadata)).await.unwrap();

        let state = store.state.lock().await;
        assert_eq!(state.optins.len(), 1);
        assert_eq!(state.optins[0].email, "a@b.com");
        assert_eq!(state.optins[0].tenant_id, "t1");
    }

    #[tokio::test]
    async fn missing_booking_time_is_recorded_as_invalid_metadata() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));

        let mut metadata = two_table_metadata();
        metadata.as_object_mut().unwrap().remove("booking_time");
        let outcome = deliver(&handler, &completed_event("evt_1", metadata)).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Malformed);
        let note = store.event("evt_1").await.unwrap().note.unwrap();
        assert!(note.starts_with("invalid_metadata"), "{note}");
    }

    #[tokio::test]
    async fn unreadable_envelope_with_id_is_acknowledged_and_recorded() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = handler(store.clone(), notifier.clone());
        let body = serde_json::to_vec(&json!({ "id": "evt_x", "type": 5 })).unwrap();

        let outcome = deliver(&handler, &body).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Malformed);
        let ledger = store.event("evt_x").await.unwrap();
        assert_eq!(ledger.status, "completed");
        assert_eq!(ledger.event_type, "unknown");
        assert!(ledger.note.unwrap().starts_with("invalid_envelope"));
        assert!(notifier.kinds().is_empty());

        assert_eq!(deliver(&handler, &body).await.unwrap(), WebhookOutcome::Malformed);
        assert_eq!(store.state.lock().await.events.len(), 1);
    }

    #[tokio::test]
    async fn signed_non_json_body_is_acknowledged_without_a_ledger_row() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone(), Arc::new(RecordingNotifier::default()));

        let outcome = deliver(&handler, b"not json").await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Malformed);
        assert!(store.state.lock().await.events.is_empty());
    }
}

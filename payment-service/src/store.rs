use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{EventStatus, StoreError};

use crate::models::*;
use crate::schema::*;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    async fn event_status(&self, event_id: &str) -> Result<Option<EventStatus>, StoreError>;

    /// Records the event as `processing`. Returns `false` when another delivery
    /// already claimed the same event id.
    async fn claim_event(&self, event: NewWebhookEvent) -> Result<bool, StoreError>;

    async fn finish_event(
        &self,
        event_id: &str,
        status: EventStatus,
        note: Option<String>,
    ) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Overlap`] when a paid booking already covers the slot.
    async fn insert_paid_booking(&self, row: NewPaidBooking) -> Result<(), StoreError>;

    async fn mark_checkout_paid(&self, row: CheckoutPaid) -> Result<(), StoreError>;

    async fn upsert_marketing_optin(&self, row: MarketingOptin) -> Result<(), StoreError>;

    /// Ledger rows still `processing` whose last update is older than `cutoff`.
    async fn stuck_events(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookEvent>, StoreError>;
}

pub struct PgFulfillmentStore {
    pool: DbPool,
}

impl PgFulfillmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FulfillmentStore for PgFulfillmentStore {
    async fn event_status(&self, event_id: &str) -> Result<Option<EventStatus>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let status = webhook_events::table
            .filter(webhook_events::event_id.eq(event_id.to_string()))
            .select(webhook_events::status)
            .first::<String>(&mut conn)
            .await
            .optional()?;

        Ok(status.as_deref().map(EventStatus::from_db))
    }

    async fn claim_event(&self, event: NewWebhookEvent) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let inserted = diesel::insert_into(webhook_events::table)
            .values(&event)
            .on_conflict(webhook_events::event_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(inserted == 1)
    }

    async fn finish_event(
        &self,
        event_id: &str,
        status: EventStatus,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        diesel::update(webhook_events::table.filter(webhook_events::event_id.eq(event_id.to_string())))
            .set((
                webhook_events::status.eq(status.as_db()),
                webhook_events::note.eq(note),
                webhook_events::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn insert_paid_booking(&self, row: NewPaidBooking) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        diesel::insert_into(bookings::table)
            .values(&row)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn mark_checkout_paid(&self, row: CheckoutPaid) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        diesel::insert_into(checkout_tracking::table)
            .values(&row)
            .on_conflict(checkout_tracking::booking_ref)
            .do_update()
            .set((
                checkout_tracking::checkout_completed.eq(true),
                checkout_tracking::payment_succeeded.eq(true),
                checkout_tracking::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn upsert_marketing_optin(&self, row: MarketingOptin) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        diesel::insert_into(marketing_optins::table)
            .values(&row)
            .on_conflict((marketing_optins::email, marketing_optins::tenant_id))
            .do_update()
            .set((
                marketing_optins::consent_text.eq(row.consent_text.clone()),
                marketing_optins::is_subscribed.eq(true),
                marketing_optins::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn stuck_events(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookEvent>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let rows = webhook_events::table
            .filter(webhook_events::status.eq(EventStatus::Processing.as_db()))
            .filter(webhook_events::updated_at.lt(cutoff))
            .order(webhook_events::updated_at.asc())
            .select(WebhookEvent::as_select())
            .load::<WebhookEvent>(&mut conn)
            .await?;

        Ok(rows)
    }
}

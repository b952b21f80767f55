use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::dsl::not;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    compute_end_time, format_time, PaymentStatus, StoreError, TimeRange, DEFAULT_DURATION_MINUTES,
};
use uuid::Uuid;

use crate::conflicts::first_overlap;
use crate::models::*;
use crate::schema::*;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// A candidate reservation: one or more tables for one time window.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRequest {
    pub tenant_id: String,
    pub booking_ref: String,
    pub date: NaiveDate,
    pub table_ids: Vec<i32>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub range: TimeRange,
}

impl SlotRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        booking_ref: impl Into<String>,
        date: NaiveDate,
        table_ids: Vec<i32>,
        start_time: NaiveTime,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            booking_ref: booking_ref.into(),
            date,
            table_ids,
            start_time,
            end_time: compute_end_time(start_time, DEFAULT_DURATION_MINUTES),
            range: TimeRange::starting_at(start_time, DEFAULT_DURATION_MINUTES),
        }
    }

    fn lock_key(&self, table_id: i32) -> String {
        format!("holds:{}:{}:{}", self.tenant_id, table_id, self.date)
    }

    /// A hold this request placed earlier for the same window. Retries renew
    /// such holds instead of conflicting with them.
    fn owns_hold(&self, booking_ref: &str, range: TimeRange) -> bool {
        !self.booking_ref.is_empty() && booking_ref == self.booking_ref && range == self.range
    }

    fn hold_rows(&self, expires_at: DateTime<Utc>) -> Vec<NewHold> {
        self.table_ids
            .iter()
            .map(|table_id| NewHold {
                id: Uuid::new_v4(),
                table_id: *table_id,
                tenant_id: self.tenant_id.clone(),
                booking_ref: self.booking_ref.clone(),
                booking_date: self.date,
                start_time: format_time(self.start_time),
                end_time: format_time(self.end_time),
                start_minute: self.range.start,
                end_minute: self.range.end,
                expires_at,
            })
            .collect()
    }
}

/// An occupied window on one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub table_id: i32,
    pub range: TimeRange,
}

impl From<(i32, i32, i32)> for Slot {
    fn from((table_id, start, end): (i32, i32, i32)) -> Self {
        Self {
            table_id,
            range: TimeRange::new(start, end),
        }
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Paid or manual bookings on the requested tables and date.
    async fn booked_slots(&self, request: &SlotRequest) -> Result<Vec<Slot>, StoreError>;

    /// Holds on the requested tables and date with `expires_at > now`, except
    /// the requester's own holds on the same window.
    async fn active_hold_slots(
        &self,
        request: &SlotRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError>;

    /// Re-checks active holds and inserts one hold per table as a single atomic step.
    ///
    /// Returns the first conflicting table when an overlapping active hold exists;
    /// nothing is written in that case. The requester's own holds on the same
    /// window are replaced, which renews their expiry.
    async fn place_holds(
        &self,
        request: &SlotRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError>;

    async fn delete_expired_holds(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn record_checkout_started(&self, booking_ref: &str, tenant_id: &str)
        -> Result<(), StoreError>;

    /// Inserts every row or none of them, under the same locks as hold placement.
    ///
    /// Returns the first table held by an active checkout; nothing is written in
    /// that case.
    async fn insert_manual_bookings(
        &self,
        request: &SlotRequest,
        rows: Vec<NewBooking>,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError>;

    async fn list_bookings(&self, tenant_id: &str, date: NaiveDate)
        -> Result<Vec<Booking>, StoreError>;

    /// Deletes the booking only when it belongs to `tenant_id`.
    async fn delete_booking(&self, booking_id: Uuid, tenant_id: &str) -> Result<bool, StoreError>;

    async fn admin_key_digest(&self, tenant_id: &str) -> Result<Option<String>, StoreError>;
}

pub struct PgReservationStore {
    pool: DbPool,
}

impl PgReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_active_holds(
    conn: &mut AsyncPgConnection,
    request: &SlotRequest,
    now: DateTime<Utc>,
) -> QueryResult<Vec<Slot>> {
    let rows = holds::table
        .filter(holds::tenant_id.eq(request.tenant_id.clone()))
        .filter(holds::booking_date.eq(request.date))
        .filter(holds::table_id.eq_any(request.table_ids.clone()))
        .filter(holds::expires_at.gt(now))
        .filter(not(holds::booking_ref
            .eq(request.booking_ref.clone())
            .and(holds::start_minute.eq(request.range.start))
            .and(holds::end_minute.eq(request.range.end))))
        .select((holds::table_id, holds::start_minute, holds::end_minute))
        .load::<(i32, i32, i32)>(conn)
        .await?;
    Ok(rows.into_iter().map(Slot::from).collect())
}

/// Serializes writers per (tenant, table, date) until the transaction ends.
async fn lock_slots(conn: &mut AsyncPgConnection, request: &SlotRequest) -> QueryResult<()> {
    // Sorted so concurrent multi-table requests acquire locks in the same order.
    let mut keys: Vec<String> = request
        .table_ids
        .iter()
        .map(|table_id| request.lock_key(*table_id))
        .collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind::<Text, _>(key)
            .execute(conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn booked_slots(&self, request: &SlotRequest) -> Result<Vec<Slot>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let rows = bookings::table
            .filter(bookings::tenant_id.eq(request.tenant_id.clone()))
            .filter(bookings::booking_date.eq(request.date))
            .filter(bookings::table_id.eq_any(request.table_ids.clone()))
            .filter(
                bookings::payment_status
                    .eq(PaymentStatus::Paid.as_db())
                    .or(bookings::is_manual.eq(true)),
            )
            .select((bookings::table_id, bookings::start_minute, bookings::end_minute))
            .load::<(i32, i32, i32)>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(Slot::from).collect())
    }

    async fn active_hold_slots(
        &self,
        request: &SlotRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;
        Ok(load_active_holds(&mut conn, request, now).await?)
    }

    async fn place_holds(
        &self,
        request: &SlotRequest,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;
        let request = request.clone();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                lock_slots(conn, &request).await?;

                let existing = load_active_holds(conn, &request, now).await?;
                if let Some(table_id) = first_overlap(&request.table_ids, request.range, &existing) {
                    return Ok(Some(table_id));
                }

                diesel::delete(
                    holds::table
                        .filter(holds::tenant_id.eq(request.tenant_id.clone()))
                        .filter(holds::booking_date.eq(request.date))
                        .filter(holds::table_id.eq_any(request.table_ids.clone()))
                        .filter(holds::booking_ref.eq(request.booking_ref.clone()))
                        .filter(holds::start_minute.eq(request.range.start))
                        .filter(holds::end_minute.eq(request.range.end)),
                )
                .execute(conn)
                .await?;

                let rows = request.hold_rows(expires_at);
                diesel::insert_into(holds::table)
                    .values(&rows)
                    .execute(conn)
                    .await?;

                Ok(None)
            })
        })
        .await
    }

    async fn delete_expired_holds(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let deleted = diesel::delete(holds::table.filter(holds::expires_at.lt(cutoff)))
            .execute(&mut conn)
            .await?;

        Ok(deleted)
    }

    async fn record_checkout_started(
        &self,
        booking_ref: &str,
        tenant_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let row = NewCheckoutTracking {
            booking_ref: booking_ref.to_string(),
            tenant_id: tenant_id.to_string(),
            session_created: true,
        };

        diesel::insert_into(checkout_tracking::table)
            .values(&row)
            .on_conflict(checkout_tracking::booking_ref)
            .do_update()
            .set((
                checkout_tracking::session_created.eq(true),
                checkout_tracking::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn insert_manual_bookings(
        &self,
        request: &SlotRequest,
        rows: Vec<NewBooking>,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;
        let request = request.clone();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                lock_slots(conn, &request).await?;

                let held = load_active_holds(conn, &request, now).await?;
                if let Some(table_id) = first_overlap(&request.table_ids, request.range, &held) {
                    return Ok(Some(table_id));
                }

                diesel::insert_into(bookings::table)
                    .values(&rows)
                    .execute(conn)
                    .await?;
                Ok(None)
            })
        })
        .await
    }

    async fn list_bookings(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let rows = bookings::table
            .filter(bookings::tenant_id.eq(tenant_id.to_string()))
            .filter(bookings::booking_date.eq(date))
            .order((bookings::start_minute.asc(), bookings::table_id.asc()))
            .select(Booking::as_select())
            .load::<Booking>(&mut conn)
            .await?;

        Ok(rows)
    }

    async fn delete_booking(&self, booking_id: Uuid, tenant_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let deleted = diesel::delete(
            bookings::table
                .filter(bookings::id.eq(booking_id))
                .filter(bookings::tenant_id.eq(tenant_id.to_string())),
        )
        .execute(&mut conn)
        .await?;

        Ok(deleted > 0)
    }

    async fn admin_key_digest(&self, tenant_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.get().await.map_err(StoreError::unavailable)?;

        let digest = tenant_admin_keys::table
            .filter(tenant_admin_keys::tenant_id.eq(tenant_id.to_string()))
            .select(tenant_admin_keys::key_digest)
            .first::<String>(&mut conn)
            .await
            .optional()?;

        Ok(digest)
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    pub tenant_id: String,
    pub table_id: i32,
    pub booking_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub start_minute: i32,
    pub end_minute: i32,
    pub payment_status: String,
    pub stripe_order_id: Option<String>,
    pub booking_ref: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub party_size: Option<i32>,
    pub total_amount: Option<i64>,
    pub is_manual: bool,
    pub receive_offers: bool,
    pub host_notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBooking {
    pub id: Uuid,
    pub tenant_id: String,
    pub table_id: i32,
    pub booking_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub start_minute: i32,
    pub end_minute: i32,
    pub payment_status: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub party_size: Option<i32>,
    pub is_manual: bool,
    pub host_notes: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::holds)]
pub struct NewHold {
    pub id: Uuid,
    pub table_id: i32,
    pub tenant_id: String,
    pub booking_ref: String,
    pub booking_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub start_minute: i32,
    pub end_minute: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::checkout_tracking)]
pub struct NewCheckoutTracking {
    pub booking_ref: String,
    pub tenant_id: String,
    pub session_created: bool,
}

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewPaidBooking {
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
    pub receive_offers: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::webhook_events)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: Option<String>,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::webhook_events)]
pub struct NewWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub tenant_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::checkout_tracking)]
pub struct CheckoutPaid {
    pub booking_ref: String,
    pub tenant_id: String,
    pub checkout_completed: bool,
    pub payment_succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::marketing_optins)]
pub struct MarketingOptin {
    pub email: String,
    pub tenant_id: String,
    pub consent_text: String,
    pub is_subscribed: bool,
}

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

/// What staff and customers are told about a fulfilled (or unfulfilled) booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingSummary {
    pub tenant_id: String,
    pub booking_ref: String,
    pub table_ids: Vec<i32>,
    pub booking_date: String,
    pub start_time: String,
    pub end_time: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub party_size: Option<i32>,
    pub amount_minor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    StaffBooking {
        staff_email: String,
        booking: BookingSummary,
    },
    CustomerConfirmation {
        customer_email: String,
        booking: BookingSummary,
    },
    /// Payment taken but at least one table could not be booked; needs a manual refund.
    UnfulfilledAlert {
        staff_email: String,
        booking: BookingSummary,
        failed_tables: Vec<i32>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::StaffBooking { .. } => "staff_booking",
            Notification::CustomerConfirmation { .. } => "customer_confirmation",
            Notification::UnfulfilledAlert { .. } => "unfulfilled_alert",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification hook unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification hook answered {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts notifications as JSON to an automation hook that delivers the emails.
pub struct HookNotifier {
    client: reqwest::Client,
    url: String,
}

impl HookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .header("X-Event-Type", notification.kind())
            .json(notification)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Used when no hook is configured: notifications only reach the logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::UnfulfilledAlert {
                booking,
                failed_tables,
                ..
            } => error!(
                booking_ref = %booking.booking_ref,
                tenant_id = %booking.tenant_id,
                ?failed_tables,
                "URGENT: paid booking could not be fulfilled, refund required"
            ),
            other => info!(
                kind = other.kind(),
                payload = %serde_json::to_string(other).unwrap_or_default(),
                "Notification"
            ),
        }
        Ok(())
    }
}

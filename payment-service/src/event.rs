use serde::Deserialize;
use serde_json::{Map, Value};

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Envelope of a provider event. Only the fields fulfillment reads are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: Value,
}

/// The completed checkout session carried by a `checkout.session.completed` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletedCheckout {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Charged amount in minor units, as settled by the provider.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CompletedCheckout {
    pub fn from_event(event: &ProviderEvent) -> Result<Self, serde_json::Error> {
        serde_json::from_value(event.data.object.clone())
    }

    /// Reference stored on each booking row for tracing back to the provider.
    pub fn order_reference(&self) -> String {
        self.payment_intent.clone().unwrap_or_else(|| self.id.clone())
    }
}

/// Splits `total` across `parts` rows; the remainder lands on the first row so
/// the rows always sum to the charged amount.
pub fn split_amount(total: i64, parts: usize) -> Vec<i64> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_i = parts as i64;
    let base = total / parts_i;
    let mut shares = vec![base; parts];
    shares[0] += total - base * parts_i;
    shares
}

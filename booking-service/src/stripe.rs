//! Hosted checkout sessions via the Stripe REST API (no SDK dependency)

use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: String,
    pub description: String,
    pub metadata: Vec<(String, String)>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request to payment provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider rejected checkout session: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError>;
}

pub struct StripeCheckout {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeCheckout {
    pub fn new(client: reqwest::Client, api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    fn form_fields(request: &SessionRequest) -> Vec<(String, String)> {
        let mut fields = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), request.currency.clone()),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
        ];
        for (key, value) in &request.metadata {
            fields.push((format!("metadata[{key}]"), value.clone()));
        }
        fields
    }
}

#[async_trait]
impl CheckoutGateway for StripeCheckout {
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError> {
        let resp: serde_json::Value = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&Self::form_fields(request))
            .send()
            .await?
            .json()
            .await?;

        match (resp["id"].as_str(), resp["url"].as_str()) {
            (Some(id), Some(url)) => Ok(CheckoutSession {
                id: id.to_string(),
                url: url.to_string(),
            }),
            _ => Err(GatewayError::Rejected(
                resp["error"]["message"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| resp.to_string()),
            )),
        }
    }
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use shared::BookingError;
use tower_http::trace::TraceLayer;

use crate::handlers::WebhookHandler;
use crate::signature::SIGNATURE_HEADER;

#[derive(Clone)]
pub struct AppState {
    pub webhooks: Arc<WebhookHandler>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/stripe", post(handle_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Takes the body as raw bytes: the signature is computed over them as received.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state
        .webhooks
        .handle_event(&body, signature, Utc::now().timestamp())
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(WebhookResponse {
                received: true,
                outcome: Some(outcome.as_str()),
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                BookingError::Signature(_)
                | BookingError::Validation(_)
                | BookingError::MissingMetadata(_) => {
                    tracing::warn!("Rejected webhook delivery: {}", e);
                    StatusCode::BAD_REQUEST
                }
                _ => {
                    tracing::error!("Webhook processing failed: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                status,
                Json(WebhookResponse {
                    received: false,
                    outcome: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::*;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::handlers::{CheckoutHandler, CheckoutRequest, CheckoutResponse, ManualBookingRequest};
use crate::models::Booking;
use crate::store::ReservationStore;

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutHandler>,
    pub store: Arc<dyn ReservationStore>,
    pub table_selection_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ManualBookingResponse {
    pub booking_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub tenant_id: String,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBookingRequest {
    pub booking_id: Uuid,
    pub tenant_id: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: BookingError, redirect: &str) -> ApiError {
    let plain = |status: StatusCode, error: String| {
        (
            status,
            Json(ErrorResponse {
                error,
                status: None,
                redirect: None,
            }),
        )
    };

    match err {
        BookingError::Conflict { kind, .. } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "The selected table is no longer available. Please refresh and choose another slot."
                    .to_string(),
                status: Some(kind.as_status()),
                redirect: Some(redirect.to_string()),
            }),
        ),
        BookingError::Validation(_)
        | BookingError::MissingMetadata(_)
        | BookingError::Signature(_) => {
            plain(StatusCode::BAD_REQUEST, err.to_string())
        }
        BookingError::PaymentProvider(_) => plain(
            StatusCode::BAD_GATEWAY,
            "Payment provider unavailable, please try again".to_string(),
        ),
        BookingError::TransientStore(_) | BookingError::PartialFulfillment { .. } => plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Service temporarily unavailable".to_string(),
        ),
    }
}

/// Malformed bodies are validation failures like any other: 400, not axum's 422.
fn json_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid request: {}", rejection.body_text()),
                status: None,
                redirect: None,
            }),
        )
    })
}

fn unauthorized() -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Unauthorized".to_string(),
            status: None,
            redirect: None,
        }),
    )
}

/// Hex SHA-256 of an admin key, the form in which keys are stored.
pub fn digest_admin_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Admin keys are issued per tenant: a key only unlocks its own tenant's rows.
async fn authorize_admin(state: &AppState, headers: &HeaderMap, tenant_id: &str) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(unauthorized)?;

    let expected = state
        .store
        .admin_key_digest(tenant_id)
        .await
        .map_err(|e| error_response(e.into(), &state.table_selection_url))?;

    match expected {
        Some(digest) if digest == digest_admin_key(token) => Ok(()),
        _ => {
            tracing::warn!(tenant_id = %tenant_id, "Rejected admin request");
            Err(unauthorized())
        }
    }
}

pub fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::DELETE]);

    match allowed_origin.parse::<HeaderValue>() {
        Ok(origin) if allowed_origin != "*" => layer
            .allow_origin(AllowOrigin::exact(origin))
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        _ => layer.allow_origin(Any).allow_headers(Any),
    }
}

pub fn create_router(state: AppState, allowed_origin: &str) -> Router {
    Router::new()
        .route("/checkout-sessions", post(create_checkout))
        .route(
            "/admin/bookings",
            get(list_bookings).post(create_manual_booking).delete(delete_booking),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(cors_layer(allowed_origin))
        .layer(TraceLayer::new_for_http())
}

pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let request = json_payload(payload)?;
    state
        .checkout
        .create_checkout_session(request)
        .await
        .map(Json)
        .map_err(|e| error_response(e, &state.table_selection_url))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    authorize_admin(&state, &headers, &query.tenant_id).await?;

    let date = parse_date(&query.date).map_err(|e| error_response(e, &state.table_selection_url))?;
    state
        .checkout
        .list_bookings(&query.tenant_id, date)
        .await
        .map(Json)
        .map_err(|e| error_response(e, &state.table_selection_url))
}

pub async fn create_manual_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ManualBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ManualBookingResponse>), ApiError> {
    let request = json_payload(payload)?;
    authorize_admin(&state, &headers, &request.tenant_id).await?;

    let booking_ids = state
        .checkout
        .create_manual_booking(request)
        .await
        .map_err(|e| error_response(e, &state.table_selection_url))?;

    Ok((StatusCode::CREATED, Json(ManualBookingResponse { booking_ids })))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DeleteBookingRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let request = json_payload(payload)?;
    authorize_admin(&state, &headers, &request.tenant_id).await?;

    let deleted = state
        .checkout
        .delete_booking(request.booking_id, &request.tenant_id)
        .await
        .map_err(|e| error_response(e, &state.table_selection_url))?;

    if !deleted {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Booking not found".to_string(),
                status: None,
                redirect: None,
            }),
        ));
    }

    Ok(Json(MessageResponse {
        message: "Booking deleted".to_string(),
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

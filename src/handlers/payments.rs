use crate::handlers::common::map_service_error;
use crate::handlers::orders::capture_response;
use crate::{
    errors::{ApiError, ServiceError},
    payments::paystack::{verify_webhook_signature, SIGNATURE_HEADER},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Creates the router for Paystack callback endpoints
pub fn paystack_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify/:reference", get(verify_transaction))
        .route("/webhook", post(webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    reference: String,
}

/// Verify a Paystack transaction from the shopper's return URL
#[utoipa::path(
    get,
    path = "/api/v1/paystack/verify/{reference}",
    params(("reference" = String, Path, description = "Paystack transaction reference")),
    responses(
        (status = 200, description = "Capture succeeded or was already finalized"),
        (status = 402, description = "Payment failed"),
        (status = 404, description = "No order for this reference")
    ),
    tag = "payments"
)]
pub async fn verify_transaction(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .find_by_provider_ref(&reference)
        .await
        .map_err(map_service_error)?;

    let outcome = state
        .services
        .orders
        .finalize_capture(order.id, Some(&reference))
        .await
        .map_err(map_service_error)?;

    Ok(capture_response(outcome))
}

/// Paystack webhook receiver.
///
/// Authenticated by HMAC-SHA512 of the raw body; unsigned or mis-signed
/// deliveries get 401 and are otherwise ignored. `charge.success` events
/// run the same idempotent capture finalization as the return-URL path, so
/// the two racing is harmless. Always returns 200 for authenticated
/// events, including ones we do not act on, so Paystack stops redelivering.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let secret_key = state
        .config
        .paystack_secret_key
        .as_deref()
        .ok_or_else(|| {
            map_service_error(ServiceError::InvalidOperation(
                "Paystack is not configured".to_string(),
            ))
        })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(secret_key, &body, signature) {
        warn!("Rejected webhook with bad signature");
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Unparseable webhook payload: {}", e);
            return Ok(StatusCode::OK.into_response());
        }
    };

    if event.event != "charge.success" {
        info!(event = %event.event, "Ignoring webhook event");
        return Ok(StatusCode::OK.into_response());
    }

    match state
        .services
        .orders
        .find_by_provider_ref(&event.data.reference)
        .await
    {
        Ok(order) => {
            let outcome = state
                .services
                .orders
                .finalize_capture(order.id, Some(&event.data.reference))
                .await
                .map_err(map_service_error)?;
            info!(order_id = %order.id, ?outcome, "Webhook capture processed");
        }
        Err(ServiceError::NotFound(_)) => {
            warn!(reference = %event.data.reference, "Webhook for unknown order");
        }
        Err(e) => return Err(map_service_error(e)),
    }

    Ok(StatusCode::OK.into_response())
}

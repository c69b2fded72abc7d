use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use crate::services::{WebhookError, WebhookOutcome};

const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";
const DELIVERY_SECRET_HEADER: &str = "x-webhook-secret";

/// POST /webhooks/paystack
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header(&headers, PAYSTACK_SIGNATURE_HEADER);
    info!(bytes = body.len(), signed = signature.is_some(), "Paystack webhook received");

    let result = state
        .reconciler
        .handle_payment_webhook(&body, signature)
        .await;
    respond(result)
}

/// POST /webhooks/delivery
pub async fn delivery_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = header(&headers, DELIVERY_SECRET_HEADER);
    info!(bytes = body.len(), "Delivery webhook received");

    let result = state.reconciler.handle_delivery_webhook(&body, secret).await;
    respond(result)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Senders only learn about bad signatures. Everything else, storage
/// trouble included, is acknowledged with 200 and left to the logs.
fn respond(result: Result<WebhookOutcome, WebhookError>) -> Response {
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "result": outcome })),
        )
            .into_response(),
        Err(WebhookError::InvalidSignature { origin }) => {
            warn!(source = origin.as_str(), "Rejected webhook with invalid signature");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "error", "message": "Invalid signature" })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Webhook accepted with errors");
            (
                StatusCode::OK,
                Json(json!({ "status": "error", "message": "Accepted with errors" })),
            )
                .into_response()
        }
    }
}

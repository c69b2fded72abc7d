use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use super::{user_id, with_request_id, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::purchase_orchestrator::{
    AirtimePurchaseRequest, DataPurchaseRequest, PurchaseReceipt,
};

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// POST /api/v1/purchases/data
pub async fn purchase_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<DataPurchaseRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    if let Some(key) = idempotency_key(&headers) {
        request.idempotency_key = Some(key);
    }
    info!(user_id = %user_id, plan_id = request.plan_id, "Data purchase requested");

    let receipt = state
        .orchestrator
        .purchase_data(&user_id, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(receipt_response(receipt))
}

/// POST /api/v1/purchases/airtime
pub async fn purchase_airtime(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<AirtimePurchaseRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    if let Some(key) = idempotency_key(&headers) {
        request.idempotency_key = Some(key);
    }
    info!(
        user_id = %user_id,
        network_id = request.network_id,
        amount = request.amount,
        "Airtime purchase requested"
    );

    let receipt = state
        .orchestrator
        .purchase_airtime(&user_id, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(receipt_response(receipt))
}

/// The header wins over a key sent in the body
fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 202 while delivery or payment is still outstanding
pub(crate) fn receipt_response(receipt: PurchaseReceipt) -> Response {
    let status = if receipt.is_pending() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, success_response(receipt)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn idempotency_header_is_trimmed_and_blank_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("   "));
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static(" key-1 "));
        assert_eq!(idempotency_key(&headers).as_deref(), Some("key-1"));
    }
}

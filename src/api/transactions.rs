use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use uuid::Uuid;

use super::purchases::receipt_response;
use super::{user_id, with_request_id, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;

/// GET /api/v1/transactions/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = user_id(&headers)?;
    let tx = state
        .orchestrator
        .get_transaction(&user_id, id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(success_response(tx))
}

/// POST /api/v1/transactions/{id}/retry
pub async fn retry_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let receipt = state
        .orchestrator
        .retry_transaction(&user_id, id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(receipt_response(receipt))
}

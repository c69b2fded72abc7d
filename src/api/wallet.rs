use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use tracing::info;

use super::{user_id, with_request_id, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::funding::FundWalletRequest;

type JsonResult = Result<Json<serde_json::Value>, AppError>;

/// GET /api/v1/wallet
pub async fn get_wallet(State(state): State<AppState>, headers: HeaderMap) -> JsonResult {
    let user_id = user_id(&headers)?;
    let balance = state
        .wallet
        .wallet_balance(&user_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(success_response(balance))
}

/// POST /api/v1/wallet/fund
pub async fn fund_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FundWalletRequest>,
) -> JsonResult {
    let user_id = user_id(&headers)?;
    info!(user_id = %user_id, amount = request.amount, "Wallet funding requested");
    let checkout = state
        .funding
        .initialize_funding(&user_id, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(success_response(checkout))
}

/// GET /api/v1/wallet/fund/verify/{reference}
pub async fn verify_funding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> JsonResult {
    let user_id = user_id(&headers)?;
    let status = state
        .funding
        .verify_funding(&user_id, &reference)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(success_response(status))
}

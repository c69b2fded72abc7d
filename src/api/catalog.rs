use axum::{
    extract::{Path, State},
    Json,
};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::success_response;

/// GET /api/v1/networks/{id}/plans
pub async fn list_plans(
    State(state): State<AppState>,
    Path(network_id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    let listing = state.catalog.list_plans(network_id).await?;
    Ok(success_response(listing))
}

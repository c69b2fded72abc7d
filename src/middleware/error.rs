//! Error response formatting
//!
//! Every failed request answers with the same JSON envelope so clients can
//! branch on `error` and `category` without parsing messages.

use crate::error::{AppError, ErrorCategory, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// JSON body of every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorCode,
    pub message: String,
    pub category: ErrorCategory,
    pub status_code: u16,
    /// Echo of `x-request-id` when the caller sent one
    pub request_id: Option<String>,
    pub timestamp: String,
    /// True when resending the same request (same idempotency key) may succeed
    pub retryable: bool,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            success: false,
            error: error.error_code(),
            message: error.user_message(),
            category: error.category(),
            status_code: error.status_code(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: error.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match status {
            s if s.is_server_error() => tracing::error!(
                error = %self,
                code = ?self.error_code(),
                request_id = ?self.request_id,
                context = ?self.context,
                status = s.as_u16(),
                "Request failed"
            ),
            s => tracing::warn!(
                code = ?self.error_code(),
                request_id = ?self.request_id,
                status = s.as_u16(),
                "Request rejected"
            ),
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// `{"success": true, "data": ...}` envelope used by every handler
pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

use crate::error::{AppError, ExternalError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// Connection failure or client timeout; the provider may still have
    /// processed the request
    #[error("{provider} transport error: {message}")]
    Transport {
        provider: String,
        message: String,
        timed_out: bool,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} response could not be decoded: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider} rejected credentials: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider} reports request {request_id} as already processed")]
    Duplicate {
        provider: String,
        request_id: String,
    },

    #[error("unknown delivery provider: {0}")]
    UnknownProvider(String),
}

impl DeliveryError {
    pub fn transport(provider: &str, err: reqwest::Error) -> Self {
        DeliveryError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }

    pub fn decode(provider: &str, message: impl ToString) -> Self {
        DeliveryError::Decode {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Outcome unknown: the request may or may not have been fulfilled
    pub fn is_ambiguous(&self) -> bool {
        match self {
            DeliveryError::Transport { .. } | DeliveryError::Decode { .. } => true,
            DeliveryError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Duplicate {
                provider,
                request_id,
            } => AppError::external(ExternalError::DuplicateRequest {
                provider,
                reference: request_id,
            }),
            DeliveryError::Auth { provider, .. } => {
                AppError::external(ExternalError::AuthenticationFailed { provider })
            }
            DeliveryError::Transport {
                provider,
                timed_out: true,
                ..
            } => AppError::external(ExternalError::Timeout {
                service: provider,
                timeout_secs: 0,
            }),
            DeliveryError::UnknownProvider(name) => AppError::internal(format!(
                "delivery provider '{}' is not configured",
                name
            )),
            other => {
                let provider = match &other {
                    DeliveryError::Transport { provider, .. }
                    | DeliveryError::Http { provider, .. }
                    | DeliveryError::Decode { provider, .. } => provider.clone(),
                    _ => "delivery".to_string(),
                };
                AppError::external(ExternalError::DeliveryFailed {
                    provider,
                    message: other.to_string(),
                    refunded: false,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request/Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Airtime,
    Data,
}

/// What the provider is asked to deliver
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Our transaction reference, sent as the provider request id
    pub request_id: String,
    pub kind: DeliveryKind,
    /// Provider service id (`mtn`, `mtn-data`)
    pub service_id: String,
    /// Variation/plan code, data only
    pub plan_code: Option<String>,
    pub phone: String,
    /// Face value in kobo
    pub amount: i64,
    pub network_code: String,
    pub legacy_network_id: i32,
}

/// Raw provider answer before classification
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    /// Response code (`000`, `099`, ...) when the provider uses codes
    pub code: Option<String>,
    /// Status word (`delivered`, `successful`, ...)
    pub status: Option<String>,
    pub provider_reference: Option<String>,
    pub message: Option<String>,
    pub raw: JsonValue,
}

/// Classified provider answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Pending,
    Failed,
    Duplicate,
    AuthError,
    Unknown,
}

/// Where a delivery attempt ended after at most one requery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResolution {
    Delivered,
    Failed,
    /// Still unresolved; waits for a webhook or manual requery
    Pending,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub resolution: DeliveryResolution,
    pub provider_reference: Option<String>,
    pub message: Option<String>,
    pub raw: Option<JsonValue>,
    pub requeried: bool,
}

impl DeliveryReport {
    pub fn from_reply(resolution: DeliveryResolution, reply: ProviderReply, requeried: bool) -> Self {
        Self {
            resolution,
            provider_reference: reply.provider_reference,
            message: reply.message,
            raw: Some(reply.raw),
            requeried,
        }
    }

    pub fn parked(message: impl Into<String>, requeried: bool) -> Self {
        Self {
            resolution: DeliveryResolution::Pending,
            provider_reference: None,
            message: Some(message.into()),
            raw: None,
            requeried,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_errors_trigger_requery() {
        let timeout = DeliveryError::Transport {
            provider: "vtpass".to_string(),
            message: "timed out".to_string(),
            timed_out: true,
        };
        let bad_gateway = DeliveryError::Http {
            provider: "vtpass".to_string(),
            status: 502,
            body: String::new(),
        };
        let bad_request = DeliveryError::Http {
            provider: "vtpass".to_string(),
            status: 400,
            body: String::new(),
        };
        assert!(timeout.is_ambiguous());
        assert!(bad_gateway.is_ambiguous());
        assert!(!bad_request.is_ambiguous());
    }

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let app: AppError = DeliveryError::Duplicate {
            provider: "legacy".to_string(),
            request_id: "VTU-1".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 409);
    }
}

use crate::error::{AppError, ExternalError, ValidationError};
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Malformed webhook payload: {message}")]
    MalformedPayload { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::MalformedPayload { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::MalformedPayload { .. } => 400,
            PaymentError::ProviderError { .. } => 502,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "payment".to_string()),
                    reason: message,
                })
            }
            PaymentError::WebhookVerificationError { .. } => {
                AppError::external(ExternalError::InvalidSignature {
                    source: "paystack".to_string(),
                })
            }
            PaymentError::MalformedPayload { message } => {
                AppError::validation(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason: message,
                })
            }
            other => {
                let provider = match &other {
                    PaymentError::ProviderError { provider, .. } => provider.clone(),
                    _ => "paystack".to_string(),
                };
                AppError::external(ExternalError::PaymentProvider {
                    provider,
                    message: other.to_string(),
                    is_retryable: other.is_retryable(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
    }

    #[test]
    fn signature_failure_becomes_unauthorized_app_error() {
        let app: AppError = PaymentError::WebhookVerificationError {
            message: "bad signature".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 401);
        assert!(!app.is_retryable());
    }

    #[test]
    fn network_errors_stay_retryable_through_conversion() {
        let app: AppError = PaymentError::NetworkError {
            message: "timeout".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 502);
        assert!(app.is_retryable());
    }
}

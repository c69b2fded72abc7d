//! Unified error handling for the VTU backend
//!
//! Every operational failure the core can surface is an [`AppError`]. The
//! kind decides the HTTP status, the machine-readable code, the coarse
//! category shown to clients and whether a retry makes sense.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "WALLET_INACTIVE")]
    WalletInactive,
    #[serde(rename = "WALLET_NOT_FOUND")]
    WalletNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "MAX_RETRIES_EXCEEDED")]
    MaxRetriesExceeded,
    #[serde(rename = "TRANSACTION_NOT_RETRYABLE")]
    TransactionNotRetryable,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,

    // Provider errors
    #[serde(rename = "DELIVERY_FAILED")]
    DeliveryFailed,
    #[serde(rename = "DUPLICATE_PROVIDER_REQUEST")]
    DuplicateProviderRequest,
    #[serde(rename = "PROVIDER_AUTH_FAILED")]
    ProviderAuthFailed,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
    #[serde(rename = "INVALID_WEBHOOK_SIGNATURE")]
    InvalidWebhookSignature,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Coarse grouping returned to clients next to the error code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Business,
    NotFound,
    Provider,
    Internal,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Wallet balance is below the amount being charged
    InsufficientBalance { available: i64, required: i64 },
    /// Wallet is frozen or suspended
    WalletInactive { user_id: String, status: String },
    WalletNotFound { user_id: String },
    TransactionNotFound { transaction_id: String },
    /// Manual retry cap reached
    MaxRetriesExceeded { transaction_id: String, max_retries: u32 },
    /// Transaction state does not allow a retry
    NotRetryable { transaction_id: String, reason: String },
    /// Gateway confirmed a different amount than the transaction recorded
    AmountMismatch { reference: String, expected: i64, actual: i64 },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Upstream provider errors (delivery provider, payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Provider reported a definitive failure; `refunded` tells whether the
    /// wallet debit was reversed.
    DeliveryFailed {
        provider: String,
        message: String,
        refunded: bool,
    },
    /// Provider says the request id was already processed
    DuplicateRequest { provider: String, reference: String },
    /// Provider rejected our credentials
    AuthenticationFailed { provider: String },
    /// Payment gateway error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Inbound webhook failed signature verification
    InvalidSignature { source: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidPhoneNumber { phone: String },
    MissingField { field: String },
    /// Catalog item (plan, network) missing or inactive
    UnknownItem { item: String, id: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn external(err: ExternalError) -> Self {
        Self::new(AppErrorKind::External(err))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: message.into(),
            is_retryable: false,
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 422,
                DomainError::WalletInactive { .. } => 422,
                DomainError::WalletNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::MaxRetriesExceeded { .. } => 422,
                DomainError::NotRetryable { .. } => 409,
                DomainError::AmountMismatch { .. } => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::DeliveryFailed { .. } => 502,
                ExternalError::DuplicateRequest { .. } => 409,
                ExternalError::AuthenticationFailed { .. } => 401,
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::InvalidSignature { .. } => 401,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::UnknownItem { .. } => 400,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::WalletInactive { .. } => ErrorCode::WalletInactive,
                DomainError::WalletNotFound { .. } => ErrorCode::WalletNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded,
                DomainError::NotRetryable { .. } => ErrorCode::TransactionNotRetryable,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::DeliveryFailed { .. } => ErrorCode::DeliveryFailed,
                ExternalError::DuplicateRequest { .. } => ErrorCode::DuplicateProviderRequest,
                ExternalError::AuthenticationFailed { .. } => ErrorCode::ProviderAuthFailed,
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::InvalidSignature { .. } => ErrorCode::InvalidWebhookSignature,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match &self.kind {
            AppErrorKind::Domain(DomainError::WalletNotFound { .. })
            | AppErrorKind::Domain(DomainError::TransactionNotFound { .. }) => {
                ErrorCategory::NotFound
            }
            AppErrorKind::Domain(_) => ErrorCategory::Business,
            AppErrorKind::Infrastructure(_) => ErrorCategory::Internal,
            AppErrorKind::External(_) => ErrorCategory::Provider,
            AppErrorKind::Validation(_) => ErrorCategory::Validation,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient wallet balance. Available: {}, Required: {}",
                    format_naira(*available),
                    format_naira(*required)
                ),
                DomainError::WalletInactive { status, .. } => {
                    format!("Wallet is {} and cannot be debited", status)
                }
                DomainError::WalletNotFound { user_id } => {
                    format!("Wallet for user '{}' not found", user_id)
                }
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::MaxRetriesExceeded { .. } => "Maximum retries exceeded".to_string(),
                DomainError::NotRetryable { reason, .. } => {
                    format!("Transaction cannot be retried: {}", reason)
                }
                DomainError::AmountMismatch {
                    reference,
                    expected,
                    actual,
                } => format!(
                    "Amount mismatch for '{}': expected {}, got {}",
                    reference,
                    format_naira(*expected),
                    format_naira(*actual)
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::DeliveryFailed {
                    message, refunded, ..
                } => {
                    if *refunded {
                        format!("Purchase failed: {} (Refunded)", message)
                    } else {
                        format!("Purchase failed: {}", message)
                    }
                }
                ExternalError::DuplicateRequest { reference, .. } => format!(
                    "Request '{}' was already processed by the provider. It will be reconciled automatically",
                    reference
                ),
                ExternalError::AuthenticationFailed { provider } => format!(
                    "Service provider ({}) rejected our credentials. Please contact support",
                    provider
                ),
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidPhoneNumber { phone } => {
                    format!("Invalid phone number '{}'", phone)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::UnknownItem { item, id } => {
                    format!("{} '{}' not found or inactive", item, id)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::DeliveryFailed { .. } => false,
                ExternalError::DuplicateRequest { .. } => false,
                ExternalError::AuthenticationFailed { .. } => false,
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::InvalidSignature { .. } => false,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

/// Render kobo as a naira string, e.g. `25000` -> `₦250.00`
pub fn format_naira(kobo: i64) -> String {
    let sign = if kobo < 0 { "-" } else { "" };
    let abs = kobo.unsigned_abs();
    format!("{}₦{}.{:02}", sign, abs / 100, abs % 100)
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in
// payments/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Charge state as the gateway reports it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Pending,
    Failed,
    Abandoned,
    Reversed,
    Unknown,
}

impl ChargeStatus {
    pub fn from_gateway(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => ChargeStatus::Success,
            "pending" | "ongoing" | "processing" | "queued" => ChargeStatus::Pending,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            "reversed" => ChargeStatus::Reversed,
            _ => ChargeStatus::Unknown,
        }
    }

    /// The charge will never succeed
    pub fn is_final_failure(&self) -> bool {
        matches!(
            self,
            ChargeStatus::Failed | ChargeStatus::Abandoned | ChargeStatus::Reversed
        )
    }
}

/// Hosted checkout request. `amount` is kobo.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount: i64,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub reference: String,
    pub status: ChargeStatus,
    /// Kobo
    pub amount: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub paid_at: Option<String>,
    pub gateway_response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    ChargeSuccess,
    ChargeFailed,
    Other,
}

impl WebhookEventKind {
    pub fn from_event(event: &str) -> Self {
        match event {
            "charge.success" => WebhookEventKind::ChargeSuccess,
            "charge.failed" => WebhookEventKind::ChargeFailed,
            _ => WebhookEventKind::Other,
        }
    }
}

/// Parsed gateway webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub kind: WebhookEventKind,
    pub reference: Option<String>,
    /// Kobo
    pub amount: Option<i64>,
    pub status: Option<ChargeStatus>,
    pub gateway_response: Option<String>,
    pub payload: JsonValue,
}

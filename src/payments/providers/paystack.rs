use crate::config::PaystackSettings;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    ChargeStatus, InitializeRequest, InitializeResponse, VerifyResponse, WebhookEvent,
    WebhookEventKind, WebhookVerificationResult,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const PROVIDER: &str = "paystack";

pub struct PaystackGateway {
    settings: PaystackSettings,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(settings: PaystackSettings) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            PROVIDER,
            Duration::from_secs(settings.timeout_secs),
            settings.max_retries,
        )?;
        Ok(Self { settings, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn rejected(message: String) -> PaymentError {
        PaymentError::ProviderError {
            provider: PROVIDER.to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn initialize_payment(
        &self,
        request: InitializeRequest,
    ) -> PaymentResult<InitializeResponse> {
        if request.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if request.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "email is required for paystack initialization".to_string(),
                field: Some("email".to_string()),
            });
        }

        let callback_url = request
            .callback_url
            .clone()
            .or_else(|| self.settings.callback_url.clone());
        let payload = serde_json::json!({
            "email": request.email,
            "amount": request.amount,
            "currency": "NGN",
            "reference": request.reference,
            "callback_url": callback_url,
            "metadata": request.metadata,
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                &self.settings.secret_key,
                Some(&payload),
            )
            .await?;

        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            _ => return Err(Self::rejected(raw.message)),
        };
        info!(reference = %data.reference, "paystack checkout initialized");

        Ok(InitializeResponse {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResponse> {
        if reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                &self.settings.secret_key,
                None,
            )
            .await?;
        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            _ => return Err(Self::rejected(raw.message)),
        };

        Ok(VerifyResponse {
            reference: data.reference.unwrap_or_else(|| reference.to_string()),
            status: ChargeStatus::from_gateway(&data.status),
            amount: data.amount,
            currency: data.currency.unwrap_or_else(|| "NGN".to_string()),
            channel: data.channel,
            paid_at: data.paid_at,
            gateway_response: data.gateway_response,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let secret = self
            .settings
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.settings.secret_key);
        let valid = !signature.trim().is_empty() && verify_hmac_sha512_hex(payload, secret, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid paystack signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::MalformedPayload {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data");
        let reference = data
            .and_then(|v| v.get("reference"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let amount = data.and_then(|v| v.get("amount")).and_then(|v| v.as_i64());
        let status = data
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(ChargeStatus::from_gateway);
        let gateway_response = data
            .and_then(|v| v.get("gateway_response"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        Ok(WebhookEvent {
            kind: WebhookEventKind::from_event(&event_type),
            event_type,
            reference,
            amount,
            status,
            gateway_response,
            payload: parsed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    #[serde(default)]
    reference: Option<String>,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    status: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::sign_hmac_sha512_hex;

    fn gateway() -> PaystackGateway {
        PaystackGateway::new(PaystackSettings {
            secret_key: "sk_test".to_string(),
            base_url: "https://api.paystack.co".to_string(),
            webhook_secret: None,
            callback_url: None,
            timeout_secs: 5,
            max_retries: 1,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn webhook_signature_validation() {
        let gateway = gateway();
        let payload = br#"{"event":"charge.success"}"#;

        let invalid = gateway
            .verify_webhook(payload, "invalid_signature")
            .expect("verification should not error");
        assert!(!invalid.valid);

        let signature = sign_hmac_sha512_hex(payload, "sk_test");
        let valid = gateway.verify_webhook(payload, &signature).unwrap();
        assert!(valid.valid);
        assert!(valid.reason.is_none());

        assert!(!gateway.verify_webhook(payload, "").unwrap().valid);
    }

    #[test]
    fn parses_charge_success_event() {
        let payload = br#"{
            "event": "charge.success",
            "data": {"reference": "VTU-20250101-abc", "amount": 100000, "status": "success"}
        }"#;
        let event = gateway().parse_webhook_event(payload).unwrap();
        assert_eq!(event.kind, WebhookEventKind::ChargeSuccess);
        assert_eq!(event.reference.as_deref(), Some("VTU-20250101-abc"));
        assert_eq!(event.amount, Some(100_000));
        assert_eq!(event.status, Some(ChargeStatus::Success));
    }

    #[test]
    fn rejects_non_json_payload() {
        assert!(matches!(
            gateway().parse_webhook_event(b"not json"),
            Err(PaymentError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn envelope_tolerates_missing_data() {
        let raw: PaystackEnvelope<PaystackVerifyData> =
            serde_json::from_str(r#"{"status": false, "message": "Transaction reference not found"}"#)
                .unwrap();
        assert!(!raw.status);
        assert!(raw.data.is_none());
    }
}

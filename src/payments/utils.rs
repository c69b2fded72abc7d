use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// JSON client for the payment gateway. Retries 429 and 5xx with
/// exponential backoff; any other non-2xx is returned immediately.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    max_retries: u32,
    backoff_base: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            max_retries,
            backoff_base: Duration::from_millis(500),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2_u32.saturating_pow(attempt.min(5))
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        bearer_token: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(bearer_token);
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if attempt < self.max_retries => {
                    warn!(
                        provider = self.provider,
                        attempt = attempt + 1,
                        error = %e,
                        "gateway request failed, retrying"
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => {
                    return Err(PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.provider, e),
                    })
                }
            };

            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
                    provider: self.provider.to_string(),
                    message: format!("invalid JSON response: {}", e),
                    provider_code: None,
                    retryable: false,
                });
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && attempt < self.max_retries {
                warn!(
                    provider = self.provider,
                    status = %status,
                    attempt = attempt + 1,
                    "gateway returned retryable status"
                );
                let wait = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.backoff(attempt));
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            if status.as_u16() == 429 {
                return Err(PaymentError::RateLimitError {
                    message: format!("{} rate limit exceeded", self.provider),
                    retry_after_seconds: retry_after,
                });
            }

            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, gateway_message(&text)),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }
    }
}

/// Pull `message` out of an error body, falling back to the raw text
fn gateway_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Hex HMAC-SHA512 of `payload` compared in constant time
pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let mut mac = match <Hmac<Sha512> as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_roundtrip_accepts_own_signature_only() {
        let payload = br#"{"event":"charge.success","data":{"reference":"VTU-1"}}"#;
        let signature = sign_hmac_sha512_hex(payload, "sk_test");
        assert_eq!(signature.len(), 128);
        assert!(verify_hmac_sha512_hex(payload, "sk_test", &signature));
        assert!(verify_hmac_sha512_hex(
            payload,
            "sk_test",
            &signature.to_ascii_uppercase()
        ));
        assert!(!verify_hmac_sha512_hex(payload, "sk_other", &signature));
        assert!(!verify_hmac_sha512_hex(payload, "sk_test", "not-a-valid-signature"));
    }

    #[test]
    fn gateway_message_prefers_json_message() {
        assert_eq!(
            gateway_message(r#"{"status":false,"message":"Invalid key"}"#),
            "Invalid key"
        );
        assert_eq!(gateway_message("Bad Gateway"), "Bad Gateway");
    }
}

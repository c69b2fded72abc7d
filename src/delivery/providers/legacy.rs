use crate::config::DeliveryConfig;
use crate::database::catalog_repository::{Network, ProviderPlan};
use crate::delivery::classification::classify_legacy;
use crate::delivery::provider::{naira_to_kobo, DeliveryProvider};
use crate::delivery::types::{DeliveryError, DeliveryOutcome, DeliveryRequest, ProviderReply};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "legacy";

/// SME data reseller API: token auth, numeric network ids, a `Status` word
/// instead of response codes.
pub struct LegacyProvider {
    client: Client,
    api_token: String,
    base_url: String,
}

impl LegacyProvider {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeliveryError::transport(PROVIDER, e))?;

        Ok(Self {
            client,
            api_token: config.legacy_api_token.clone(),
            base_url: config.legacy_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_token)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<JsonValue, DeliveryError> {
        let response = request
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| DeliveryError::transport(PROVIDER, e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DeliveryError::Auth {
                provider: PROVIDER.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        // 400s carry a JSON body with a Status word worth classifying
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::decode(PROVIDER, e))?;
        let parsed = serde_json::from_str::<JsonValue>(&body);
        if status.is_client_error() {
            return match parsed {
                Ok(data)
                    if classify_legacy(parse_reply(data.clone()).status.as_deref())
                        != DeliveryOutcome::Unknown =>
                {
                    Ok(data)
                }
                _ => Err(DeliveryError::Http {
                    provider: PROVIDER.to_string(),
                    status: status.as_u16(),
                    body,
                }),
            };
        }

        parsed.map_err(|e| DeliveryError::decode(PROVIDER, e))
    }
}

fn string_field(data: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match data.get(*key)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_reply(data: JsonValue) -> ProviderReply {
    ProviderReply {
        code: None,
        status: string_field(&data, &["Status", "status"]),
        provider_reference: string_field(&data, &["id", "transaction_id"]),
        message: string_field(&data, &["api_response", "message", "error"]),
        raw: data,
    }
}

#[async_trait]
impl DeliveryProvider for LegacyProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn purchase_airtime(
        &self,
        request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError> {
        debug!(
            provider = PROVIDER,
            request_id = %request.request_id,
            network = request.legacy_network_id,
            amount = request.amount,
            "Purchasing airtime"
        );

        let payload = json!({
            "network": request.legacy_network_id,
            "amount": request.amount / 100,
            "mobile_number": request.phone,
            "Ported_number": true,
            "airtime_type": "VTU",
            "request_id": request.request_id,
        });
        let data = self
            .send(self.client.post(format!("{}/topup/", self.base_url)).json(&payload))
            .await?;
        Ok(parse_reply(data))
    }

    async fn purchase_data(
        &self,
        request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError> {
        debug!(
            provider = PROVIDER,
            request_id = %request.request_id,
            network = request.legacy_network_id,
            plan_code = ?request.plan_code,
            "Purchasing data bundle"
        );

        let payload = json!({
            "network": request.legacy_network_id,
            "mobile_number": request.phone,
            "plan": request.plan_code,
            "Ported_number": true,
            "request_id": request.request_id,
        });
        let data = self
            .send(self.client.post(format!("{}/data/", self.base_url)).json(&payload))
            .await?;
        Ok(parse_reply(data))
    }

    async fn requery(&self, request_id: &str) -> Result<ProviderReply, DeliveryError> {
        debug!(provider = PROVIDER, request_id, "Requerying transaction");
        let data = self
            .send(
                self.client
                    .get(format!("{}/requery/{}", self.base_url, request_id)),
            )
            .await?;
        Ok(parse_reply(data))
    }

    fn classify(&self, reply: &ProviderReply) -> DeliveryOutcome {
        classify_legacy(reply.status.as_deref())
    }

    async fn fetch_data_plans(
        &self,
        network: &Network,
    ) -> Result<Vec<ProviderPlan>, DeliveryError> {
        let data = self
            .send(self.client.get(format!(
                "{}/plans/?network={}",
                self.base_url, network.legacy_network_id
            )))
            .await?;

        let plans = data
            .as_array()
            .or_else(|| data.get("plans").and_then(|p| p.as_array()))
            .ok_or_else(|| DeliveryError::decode(PROVIDER, "expected a plan list"))?;

        Ok(plans
            .iter()
            .filter_map(|p| {
                Some(ProviderPlan {
                    plan_code: string_field(p, &["dataplan_id", "plan_code", "id"])?,
                    name: string_field(p, &["plan", "name"])?,
                    plan_type: string_field(p, &["plan_type"])
                        .unwrap_or_else(|| "sme".to_string())
                        .to_lowercase(),
                    nominal_amount: naira_to_kobo(p.get("plan_amount")?)?,
                    validity: string_field(p, &["month_validate", "validity"]),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_reads_capitalised_status() {
        let reply = parse_reply(json!({
            "id": 88123,
            "Status": "successful",
            "api_response": "You have successfully gifted 1GB to 08031234567"
        }));

        assert_eq!(reply.status.as_deref(), Some("successful"));
        assert_eq!(reply.provider_reference.as_deref(), Some("88123"));
        assert!(reply.code.is_none());
        assert_eq!(classify_legacy(reply.status.as_deref()), DeliveryOutcome::Delivered);
    }

    #[test]
    fn test_parse_error_reply() {
        let reply = parse_reply(json!({ "status": "invalid_token", "error": "Invalid token." }));
        assert_eq!(classify_legacy(reply.status.as_deref()), DeliveryOutcome::AuthError);
        assert_eq!(reply.message.as_deref(), Some("Invalid token."));
    }
}

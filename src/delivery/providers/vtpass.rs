use crate::config::DeliveryConfig;
use crate::database::catalog_repository::{Network, ProviderPlan};
use crate::delivery::classification::classify_vtpass;
use crate::delivery::provider::{naira_to_kobo, DeliveryProvider};
use crate::delivery::types::{DeliveryError, DeliveryOutcome, DeliveryRequest, ProviderReply};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "vtpass";

/// VTpass adapter. Authenticates with `api-key`/`secret-key` headers on
/// POST and `api-key`/`public-key` on GET.
pub struct VtpassProvider {
    client: Client,
    api_key: String,
    secret_key: String,
    public_key: String,
    base_url: String,
}

impl VtpassProvider {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeliveryError::transport(PROVIDER, e))?;

        Ok(Self {
            client,
            api_key: config.vtpass_api_key.clone(),
            secret_key: config.vtpass_secret_key.clone(),
            public_key: config.vtpass_public_key.clone(),
            base_url: config.vtpass_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, payload: JsonValue) -> Result<ProviderReply, DeliveryError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .header("secret-key", &self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::transport(PROVIDER, e))?;

        let data = read_json(response).await?;
        Ok(parse_reply(data))
    }

    async fn pay(&self, payload: JsonValue) -> Result<ProviderReply, DeliveryError> {
        self.post("/api/pay", payload).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<JsonValue, DeliveryError> {
    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(DeliveryError::Auth {
            provider: PROVIDER.to_string(),
            message: format!("HTTP {}", status.as_u16()),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeliveryError::Http {
            provider: PROVIDER.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<JsonValue>()
        .await
        .map_err(|e| DeliveryError::decode(PROVIDER, e))
}

fn parse_reply(data: JsonValue) -> ProviderReply {
    let transactions = data.get("content").and_then(|c| c.get("transactions"));
    let code = data.get("code").and_then(|c| match c {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(format!("{:03}", n.as_u64().unwrap_or_default())),
        _ => None,
    });

    ProviderReply {
        code,
        status: transactions
            .and_then(|t| t.get("status"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        provider_reference: transactions
            .and_then(|t| t.get("transactionId"))
            .and_then(|id| match id {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            }),
        message: data
            .get("response_description")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        raw: data,
    }
}

#[async_trait]
impl DeliveryProvider for VtpassProvider {
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
            service_id = %request.service_id,
            amount = request.amount,
            "Purchasing airtime"
        );

        self.pay(json!({
            "request_id": request.request_id,
            "serviceID": request.service_id,
            "amount": request.amount / 100,
            "phone": request.phone,
        }))
        .await
    }

    async fn purchase_data(
        &self,
        request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError> {
        debug!(
            provider = PROVIDER,
            request_id = %request.request_id,
            service_id = %request.service_id,
            plan_code = ?request.plan_code,
            "Purchasing data bundle"
        );

        self.pay(json!({
            "request_id": request.request_id,
            "serviceID": request.service_id,
            "billersCode": request.phone,
            "variation_code": request.plan_code,
            "amount": request.amount / 100,
            "phone": request.phone,
        }))
        .await
    }

    async fn requery(&self, request_id: &str) -> Result<ProviderReply, DeliveryError> {
        debug!(provider = PROVIDER, request_id, "Requerying transaction");
        self.post("/api/requery", json!({ "request_id": request_id }))
            .await
    }

    fn classify(&self, reply: &ProviderReply) -> DeliveryOutcome {
        classify_vtpass(reply.code.as_deref(), reply.status.as_deref())
    }

    async fn fetch_data_plans(
        &self,
        network: &Network,
    ) -> Result<Vec<ProviderPlan>, DeliveryError> {
        let url = format!(
            "{}/api/service-variations?serviceID={}",
            self.base_url, network.data_service_id
        );
        let response = self
            .client
            .get(&url)
            .header("api-key", &self.api_key)
            .header("public-key", &self.public_key)
            .send()
            .await
            .map_err(|e| DeliveryError::transport(PROVIDER, e))?;

        let data = read_json(response).await?;
        let content = data.get("content");
        // The live API spells the key `varations`
        let variations = content
            .and_then(|c| c.get("variations").or_else(|| c.get("varations")))
            .and_then(|v| v.as_array())
            .ok_or_else(|| DeliveryError::decode(PROVIDER, "missing content.variations"))?;

        Ok(variations
            .iter()
            .filter_map(|v| {
                let plan_code = v.get("variation_code")?.as_str()?.to_string();
                let name = v.get("name")?.as_str()?.to_string();
                let nominal_amount = naira_to_kobo(v.get("variation_amount")?)?;
                Some(ProviderPlan {
                    plan_code,
                    name,
                    plan_type: "gifting".to_string(),
                    nominal_amount,
                    validity: None,
                })
            })
            .collect())
    }
}

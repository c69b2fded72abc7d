use super::types::{DeliveryError, DeliveryOutcome, DeliveryRequest, ProviderReply};
use crate::database::catalog_repository::{Network, ProviderPlan};
use async_trait::async_trait;

/// Upstream that delivers airtime and data bundles
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn purchase_airtime(
        &self,
        request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError>;

    async fn purchase_data(&self, request: &DeliveryRequest)
        -> Result<ProviderReply, DeliveryError>;

    /// Look up a previous request by the request id we sent
    async fn requery(&self, request_id: &str) -> Result<ProviderReply, DeliveryError>;

    /// Map a reply onto the shared outcome vocabulary
    fn classify(&self, reply: &ProviderReply) -> DeliveryOutcome;

    async fn fetch_data_plans(&self, network: &Network)
        -> Result<Vec<ProviderPlan>, DeliveryError>;
}

/// Parse a naira amount as providers send it (`"100"`, `"99.50"`, `100`) into
/// kobo.
pub fn naira_to_kobo(value: &serde_json::Value) -> Option<i64> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().replace(',', ""),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text.as_str(), ""),
    };
    let whole: i64 = whole.parse().ok()?;
    let mut fraction: String = fraction.chars().take(2).collect();
    while fraction.len() < 2 {
        fraction.push('0');
    }
    let fraction: i64 = fraction.parse().ok()?;
    whole.checked_mul(100)?.checked_add(fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_naira_to_kobo() {
        assert_eq!(naira_to_kobo(&json!("100")), Some(10_000));
        assert_eq!(naira_to_kobo(&json!("99.5")), Some(9_950));
        assert_eq!(naira_to_kobo(&json!("1,200.00")), Some(120_000));
        assert_eq!(naira_to_kobo(&json!(250)), Some(25_000));
        assert_eq!(naira_to_kobo(&json!("abc")), None);
        assert_eq!(naira_to_kobo(&json!(null)), None);
    }
}

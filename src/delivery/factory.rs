use crate::config::DeliveryConfig;
use crate::delivery::provider::DeliveryProvider;
use crate::delivery::providers::{LegacyProvider, VtpassProvider};
use crate::delivery::types::DeliveryError;
use std::sync::Arc;

pub const SUPPORTED_PROVIDERS: &[&str] = &["legacy", "vtpass"];

/// Builds the configured delivery provider
pub struct DeliveryProviderFactory {
    config: DeliveryConfig,
}

impl DeliveryProviderFactory {
    pub fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }

    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn DeliveryProvider>, DeliveryError> {
        match name.trim().to_lowercase().as_str() {
            "legacy" => Ok(Arc::new(LegacyProvider::new(&self.config)?)),
            "vtpass" => Ok(Arc::new(VtpassProvider::new(&self.config)?)),
            other => Err(DeliveryError::UnknownProvider(other.to_string())),
        }
    }

    pub fn get_default_provider(&self) -> Result<Arc<dyn DeliveryProvider>, DeliveryError> {
        self.get_provider(&self.config.provider)
    }

    pub fn list_available_providers(&self) -> &'static [&'static str] {
        SUPPORTED_PROVIDERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> DeliveryConfig {
        DeliveryConfig {
            provider: provider.to_string(),
            legacy_base_url: "https://legacy.test/api".to_string(),
            legacy_api_token: "token".to_string(),
            vtpass_base_url: "https://sandbox.vtpass.com".to_string(),
            vtpass_api_key: "key".to_string(),
            vtpass_secret_key: "secret".to_string(),
            vtpass_public_key: "public".to_string(),
            timeout_secs: 5,
            webhook_secret: None,
        }
    }

    #[test]
    fn test_builds_configured_provider() {
        let factory = DeliveryProviderFactory::new(config("legacy"));
        assert_eq!(factory.get_default_provider().unwrap().name(), "legacy");
        assert_eq!(factory.get_provider("VTPASS").unwrap().name(), "vtpass");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let factory = DeliveryProviderFactory::new(config("vtpass"));
        assert!(matches!(
            factory.get_provider("shago"),
            Err(DeliveryError::UnknownProvider(_))
        ));
    }
}

use crate::database::catalog_repository::{DataPlan, Network};
use crate::database::LedgerStore;
use crate::delivery::DeliveryProvider;
use crate::error::{AppError, AppResult, ValidationError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct PlanListing {
    pub network: Network,
    pub plans: Vec<DataPlan>,
    /// False when the provider could not be reached and stored plans were used
    pub refreshed: bool,
}

/// Data plan catalog. Plans are refreshed from the delivery provider on read,
/// with the stored catalog as fallback.
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    delivery: Arc<dyn DeliveryProvider>,
    refresh_from_provider: bool,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        delivery: Arc<dyn DeliveryProvider>,
        refresh_from_provider: bool,
    ) -> Self {
        Self {
            store,
            delivery,
            refresh_from_provider,
        }
    }

    pub async fn list_plans(&self, network_id: i32) -> AppResult<PlanListing> {
        let network = self
            .store
            .find_network(network_id)
            .await?
            .filter(|n| n.is_active)
            .ok_or_else(|| {
                AppError::validation(ValidationError::UnknownItem {
                    item: "network".to_string(),
                    id: network_id.to_string(),
                })
            })?;

        let mut refreshed = false;
        if self.refresh_from_provider {
            match self.delivery.fetch_data_plans(&network).await {
                Ok(plans) if !plans.is_empty() => {
                    let written = self.store.upsert_plans(network.id, &plans).await?;
                    debug!(network = %network.code, written, "Plans refreshed from provider");
                    refreshed = true;
                }
                Ok(_) => {
                    warn!(network = %network.code, "Provider returned no plans, using stored catalog")
                }
                Err(e) => {
                    warn!(network = %network.code, error = %e, "Plan refresh failed, using stored catalog")
                }
            }
        }

        let plans = self.store.list_plans(network.id).await?;
        Ok(PlanListing {
            network,
            plans,
            refreshed,
        })
    }
}

//! Health check module
//! Reports whether the ledger store answers and which providers are wired in

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::LedgerStore;

/// Slower than this and the store is reported as a warning
const SLOW_STORE_MS: u128 = 1_000;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Degraded still serves traffic
    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn LedgerStore>,
    delivery_provider: String,
    store_timeout: Duration,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn LedgerStore>, delivery_provider: impl Into<String>) -> Self {
        Self {
            store,
            delivery_provider: delivery_provider.into(),
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let store = self.check_store().await;
        health_status.status = match store.status {
            ComponentState::Up => HealthState::Healthy,
            ComponentState::Warning => HealthState::Degraded,
            ComponentState::Down => HealthState::Unhealthy,
        };
        health_status.checks.insert("database".to_string(), store);

        // Providers are only called on demand; report which one is wired in
        let mut delivery = ComponentHealth::up(None);
        delivery.details = Some(self.delivery_provider.clone());
        health_status
            .checks
            .insert("delivery_provider".to_string(), delivery);

        health_status
    }

    async fn check_store(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(self.store_timeout, self.store.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                if elapsed > SLOW_STORE_MS {
                    warn!(response_time_ms = elapsed, "Database health check slow");
                    ComponentHealth::warning(Some(elapsed), Some("Slow response".to_string()))
                } else {
                    info!("Database health check: OK ({}ms)", elapsed);
                    ComponentHealth::up(Some(elapsed))
                }
            }
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryLedgerStore;

    #[test]
    fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert_eq!(health_status.status, HealthState::Healthy);
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn degraded_still_counts_as_healthy() {
        let mut status = HealthStatus::new();
        status.status = HealthState::Degraded;
        assert!(status.is_healthy());
        status.status = HealthState::Unhealthy;
        assert!(!status.is_healthy());
    }

    #[tokio::test]
    async fn in_memory_store_reports_up() {
        let checker = HealthChecker::new(Arc::new(InMemoryLedgerStore::new()), "vtpass");
        let status = checker.check_health().await;

        assert_eq!(status.status, HealthState::Healthy);
        assert_eq!(status.checks["database"].status, ComponentState::Up);
        assert_eq!(
            status.checks["delivery_provider"].details.as_deref(),
            Some("vtpass")
        );
    }
}

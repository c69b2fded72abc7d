//! HTTP surface

pub mod catalog;
pub mod purchases;
pub mod transactions;
pub mod wallet;
pub mod webhooks;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::config::PurchaseConfig;
use crate::database::LedgerStore;
use crate::delivery::DeliveryProvider;
use crate::error::{AppError, AppResult, ValidationError};
use crate::health::HealthChecker;
use crate::payments::PaymentGateway;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::{
    CatalogService, FundingService, PurchaseOrchestrator, WalletService, WebhookReconciler,
};

/// Header the upstream auth gateway sets to the authenticated user
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PurchaseOrchestrator>,
    pub funding: Arc<FundingService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub wallet: Arc<WalletService>,
    pub catalog: Arc<CatalogService>,
    pub health: HealthChecker,
}

/// Wiring shared by the binary and the integration tests
pub struct StateBuilder {
    pub store: Arc<dyn LedgerStore>,
    pub delivery: Arc<dyn DeliveryProvider>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub purchase: PurchaseConfig,
    pub delivery_webhook_secret: Option<String>,
    pub refresh_catalog: bool,
}

impl StateBuilder {
    pub fn build(self) -> AppState {
        let orchestrator = Arc::new(PurchaseOrchestrator::new(
            self.store.clone(),
            self.delivery.clone(),
            self.gateway.clone(),
            self.purchase,
        ));
        let funding = Arc::new(FundingService::new(self.store.clone(), self.gateway.clone()));
        let reconciler = Arc::new(WebhookReconciler::new(
            self.store.clone(),
            self.gateway,
            orchestrator.clone(),
            funding.clone(),
            self.delivery_webhook_secret,
        ));

        AppState {
            health: HealthChecker::new(self.store.clone(), self.delivery.name()),
            wallet: Arc::new(WalletService::new(self.store.clone())),
            catalog: Arc::new(CatalogService::new(
                self.store,
                self.delivery,
                self.refresh_catalog,
            )),
            orchestrator,
            funding,
            reconciler,
        }
    }
}

/// All routes, without middleware layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/purchases/data", post(purchases::purchase_data))
        .route("/api/v1/purchases/airtime", post(purchases::purchase_airtime))
        .route("/api/v1/transactions/{id}", get(transactions::get_transaction))
        .route(
            "/api/v1/transactions/{id}/retry",
            post(transactions::retry_transaction),
        )
        .route("/api/v1/wallet", get(wallet::get_wallet))
        .route("/api/v1/wallet/fund", post(wallet::fund_wallet))
        .route(
            "/api/v1/wallet/fund/verify/{reference}",
            get(wallet::verify_funding),
        )
        .route("/api/v1/networks/{id}/plans", get(catalog::list_plans))
        .route("/webhooks/paystack", post(webhooks::paystack_webhook))
        .route("/webhooks/delivery", post(webhooks::delivery_webhook))
        .with_state(state)
}

async fn root() -> &'static str {
    "VTU backend is running"
}

async fn health(State(state): State<AppState>) -> Response {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

/// Authenticated user id, set by the gateway in front of this service
pub(crate) fn user_id(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            with_request_id(
                AppError::validation(ValidationError::MissingField {
                    field: USER_ID_HEADER.to_string(),
                }),
                headers,
            )
        })
}

/// Attach the request id so the error envelope can echo it
pub(crate) fn with_request_id(error: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

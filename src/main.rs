use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use vtu_backend::api::{self, StateBuilder};
use vtu_backend::config::AppConfig;
use vtu_backend::database::{init_pool, InMemoryLedgerStore, LedgerStore, PgLedgerStore, PoolConfig};
use vtu_backend::delivery::DeliveryProviderFactory;
use vtu_backend::logging::init_tracing;
use vtu_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use vtu_backend::payments::PaystackGateway;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        delivery_provider = %config.delivery.provider,
        skip_externals = config.server.skip_externals,
        "Starting VTU backend"
    );

    let store: Arc<dyn LedgerStore> = if config.server.skip_externals {
        warn!("SKIP_EXTERNALS=true, using the in-memory ledger store");
        Arc::new(InMemoryLedgerStore::with_default_catalog().await)
    } else {
        let pool = init_pool(&config.database.url, PoolConfig::from(&config.database)).await?;
        let store = PgLedgerStore::new(pool);
        store.migrate().await.map_err(|e| {
            error!(error = %e, "Database migration failed");
            e
        })?;
        info!("Database migrations applied");
        Arc::new(store)
    };

    let delivery = DeliveryProviderFactory::new(config.delivery.clone())
        .get_default_provider()
        .map_err(|e| {
            error!(error = %e, "Failed to build delivery provider");
            e
        })?;
    info!(provider = delivery.name(), "Delivery provider ready");

    let gateway = Arc::new(PaystackGateway::new(config.paystack.clone())?);

    let state = StateBuilder {
        store,
        delivery,
        gateway,
        purchase: config.purchase.clone(),
        delivery_webhook_secret: config.delivery.webhook_secret.clone(),
        refresh_catalog: !config.server.skip_externals,
    }
    .build();

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

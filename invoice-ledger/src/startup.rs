//! Application startup and lifecycle management.
//!
//! Wires the PostgreSQL store, the webhook reconciler and the collection
//! scheduler, and serves the webhook, probe and metrics endpoints.

use crate::config::LedgerConfig;
use crate::handlers;
use crate::services::{
    CollectionScheduler, HttpNotifier, IntasendClient, InvoiceManager, InvoiceStore, LogNotifier,
    Notifier, PgStore, WebhookReconciler,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use service_core::observability::extract_request_id;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InvoiceStore>,
    pub reconciler: WebhookReconciler,
    pub intasend: IntasendClient,
}

/// Router with the webhook, probes and metrics behind the request-id, metrics and trace layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/webhooks/intasend", post(handlers::webhook::intasend_webhook))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id =
                    extract_request_id(request.headers()).unwrap_or_else(|| "-".to_string());

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Pick the notice transport: HTTP when an endpoint is configured, log-only otherwise.
pub fn build_notifier(config: &LedgerConfig) -> Result<Arc<dyn Notifier>, AppError> {
    match &config.notification.endpoint {
        Some(endpoint) => {
            let notifier = HttpNotifier::new(endpoint.as_str(), config.notification.timeout)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}", e)))?;
            tracing::info!(endpoint = %endpoint, "Notices delivered over HTTP");
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::warn!("NOTIFICATION_ENDPOINT not set - notices will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: Arc<CollectionScheduler>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LedgerConfig) -> Result<Self, AppError> {
        let db = PgStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;

        let store: Arc<dyn InvoiceStore> = Arc::new(db);
        let notifier = build_notifier(&config)?;

        let intasend = IntasendClient::new(config.gateway.clone()).map_err(|e| {
            tracing::error!("Failed to build IntaSend client: {}", e);
            AppError::ConfigError(e)
        })?;
        if intasend.is_configured() {
            tracing::info!("IntaSend client initialized");
        } else {
            tracing::warn!("IntaSend credentials not configured - collection requests disabled");
        }
        if config.gateway.webhook_secret.is_none() {
            tracing::warn!("INTASEND_WEBHOOK_SECRET not set - webhook signatures are not checked");
        }

        let reconciler = WebhookReconciler::new(
            store.clone(),
            notifier.clone(),
            config.collection.dispatch_timeout,
        );

        let manager = InvoiceManager::new(store.clone(), config.default_currency);
        let scheduler = Arc::new(CollectionScheduler::new(
            store.clone(),
            manager,
            notifier,
            config.collection.clone(),
        ));

        let state = AppState {
            store,
            reconciler,
            intasend,
        };

        // Port 0 binds a random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, service = %config.service_name, "Invoice ledger listening");

        Ok(Self {
            port,
            listener,
            router: build_router(state),
            scheduler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve HTTP and run the scheduler until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let scheduler = tokio::spawn(self.scheduler.clone().run(token.clone()));

        let stop = token.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                stop.cancel();
            })
            .await;

        token.cancel();
        if let Err(e) = scheduler.await {
            tracing::error!("Collection scheduler task failed: {}", e);
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            e
        })
    }
}

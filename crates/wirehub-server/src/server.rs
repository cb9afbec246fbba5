//! `WireHubServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::manager::SocketManager;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and dispatch table.
    pub manager: Arc<SocketManager>,
    /// When the server started.
    pub start_time: Instant,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The wirehub server.
pub struct WireHubServer {
    config: ServerConfig,
    manager: Arc<SocketManager>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl WireHubServer {
    /// Create a server with a fresh `SocketManager`.
    pub fn new(config: ServerConfig) -> Self {
        let manager = SocketManager::new(config.socket.clone());
        Self {
            config,
            manager,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: Arc::clone(&self.manager),
            start_time: self.start_time,
            max_connections: self.config.max_connections,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task,
    /// which finishes once the shutdown coordinator fires.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated with error");
            }
        });

        info!(addr = %local_addr, "wirehub listening");
        Ok((local_addr, handle))
    }

    /// The connection registry.
    pub fn manager(&self) -> &Arc<SocketManager> {
        &self.manager
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
///
/// Capacity is checked before the upgrade is validated so a full server
/// answers 503 regardless of the request.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let live = state.manager.connection_count().await;
    if live >= state.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(live, max = state.max_connections, "refusing upgrade, server full");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    match ws {
        Ok(ws) => state.manager.upgrade(ws),
        Err(rejection) => {
            counter!(WS_REJECTED_TOTAL, "reason" => "bad_upgrade").increment(1);
            rejection.into_response()
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.manager.connection_count().await;
    let handlers = state.manager.handlers().event_types();
    Json(health::health_check(state.start_time, connections, handlers))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

//! HTTP server for Prometheus metrics endpoint.

use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address is unavailable or the runtime could not start.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    /// The server stopped with an error.
    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 9090).into(),
        }
    }
}

impl MetricsServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Shared state for the metrics server.
pub struct MetricsState {
    registry: MetricsRegistry,
    last: Option<MetricsSnapshot>,
}

impl MetricsState {
    /// Updates the metrics from a snapshot.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.last = Some(snapshot.clone());
    }

    /// Whether a session has reported and is acquiring.
    pub fn is_live(&self) -> bool {
        self.last.as_ref().is_some_and(|s| s.is_live)
    }
}

/// HTTP server for exposing Prometheus metrics.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsServer {
    /// Creates a new metrics server.
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                last: None,
            })),
        }
    }

    /// Returns a reference to the shared state for updating metrics.
    ///
    /// Synchronous callers update it with `blocking_write`.
    pub fn state(&self) -> Arc<RwLock<MetricsState>> {
        Arc::clone(&self.state)
    }

    fn router(state: Arc<RwLock<MetricsState>>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/live", get(live_handler))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Starts the HTTP server.
    ///
    /// This method runs the server until it is shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            "Metrics server listening"
        );
        serve(listener, Self::router(self.state)).await
    }

    /// Binds the listen address, then runs the server on its own runtime in
    /// a background thread.
    ///
    /// A bind failure is returned here rather than from the thread. Camera
    /// access stays on the calling thread; only the shared state crosses
    /// over.
    pub fn spawn(self) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind(self.config.bind_addr))?;
        tracing::info!(
            addr = %self.config.bind_addr,
            "Metrics server listening"
        );

        let app = Self::router(self.state);
        Ok(std::thread::spawn(move || runtime.block_on(serve(listener, app))))
    }
}

async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Server(e.to_string()))
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    let state = state.read().await;

    match state.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Handler for the /live endpoint: 200 while acquiring, 503 otherwise.
async fn live_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    if state.read().await.is_live() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not acquiring")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_config_with_port() {
        let config = MetricsServerConfig::with_port(8080);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn test_state_tracks_live() {
        let server = MetricsServer::new(
            MetricsServerConfig::default(),
            MetricsRegistry::new().unwrap(),
        );
        let state = server.state();
        assert!(!state.blocking_read().is_live());

        state.blocking_write().update(&MetricsSnapshot {
            is_live: true,
            ..Default::default()
        });
        assert!(state.blocking_read().is_live());
    }

    #[test]
    fn test_spawn_reports_bind_failure() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = MetricsServer::new(
            MetricsServerConfig::with_port(port),
            MetricsRegistry::new().unwrap(),
        );
        assert!(matches!(server.spawn(), Err(ServerError::Bind(_))));
    }

    #[test]
    fn test_spawn_on_free_port() {
        let server = MetricsServer::new(
            MetricsServerConfig::with_port(0),
            MetricsRegistry::new().unwrap(),
        );
        assert!(server.spawn().is_ok());
    }
}

//! HTTP server implementation using axum.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bookcast_registry::RegistryHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::asset_pairs::AssetPairsClient;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::ClientSession;

/// Caps concurrent socket clients.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The guard can move into the upgraded socket task and
    /// frees the slot when the session ends.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    registry: RegistryHandle,
    asset_pairs: AssetPairsClient,
    connection_limiter: Arc<ConnectionLimiter>,
    config: ServerConfig,
}

impl AppState {
    pub fn new(registry: RegistryHandle, config: ServerConfig) -> ServerResult<Self> {
        let asset_pairs = AssetPairsClient::new(
            config.asset_pairs_url.clone(),
            Duration::from_millis(config.asset_pairs_timeout_ms),
        )?;
        Ok(Self {
            registry,
            asset_pairs,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        })
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/asset_pairs", get(asset_pairs))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthcheck() -> &'static str {
    "OK"
}

async fn asset_pairs(State(state): State<AppState>) -> Response {
    match state.asset_pairs.fetch().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            warn!(error = %e, "Asset pairs passthrough failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn metrics() -> Response {
    match bookcast_telemetry::gather_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            %peer,
            current = state.connection_limiter.current_count(),
            max = state.config.max_connections,
            "Client connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    let registry = state.registry.clone();
    let buffer = state.config.outbound_buffer;
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        ClientSession::run(socket, peer.to_string(), registry, buffer).await;
    })
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Bind the configured address and run the server.
pub async fn run_server(
    registry: RegistryHandle,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let addr = config.bind_addr();
    let state = AppState::new(registry, config)?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(%addr, "Starting book server");
    let result = serve(listener, state, shutdown).await;
    if let Err(e) = &result {
        error!(error = %e, "Book server failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_limiter_releases_on_drop() {
        let limiter = Arc::new(ConnectionLimiter::new(2));
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.current_count(), 2);

        drop(a);
        assert_eq!(limiter.current_count(), 1);
        assert!(limiter.try_acquire().is_some());
    }
}

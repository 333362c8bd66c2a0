//! Axum router, WebSocket upgrade and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics::counter;
use sockrelay_core::RelayQueues;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{RelayConfig, ServerConfig};
use crate::relay::run_session;
use crate::session::{CloseReason, Session, SessionRegistry};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay side of the engine queues, shared by every session.
    pub queues: RelayQueues,
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Relay loop configuration.
    pub relay: RelayConfig,
    /// Max inbound message and frame size in bytes.
    pub max_message_size: usize,
    /// Cancelled once shutdown begins; new upgrades are refused after that.
    pub shutdown: CancellationToken,
}

/// Build the axum router: the WebSocket endpoint and the liveness probe.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route(&config.health_path, get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, queues: RelayQueues) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SessionRegistry::new());
    let coordinator = ShutdownCoordinator::new(Arc::clone(&registry));

    let state = AppState {
        queues,
        registry: Arc::clone(&registry),
        relay: config.relay.clone(),
        max_message_size: config.max_message_size,
        shutdown: coordinator.token(),
    };
    let router = build_router(state, &config);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, ws_path = %config.ws_path, "relay server started");

    let token = coordinator.token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        registry,
        coordinator,
        server,
        shutdown_timeout: config.shutdown_timeout,
    })
}

/// Handle returned by [`start`]; keeps the listener task alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    coordinator: ShutdownCoordinator,
    server: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting, drain every session and wait for them to close.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self
            .coordinator
            .graceful_shutdown(self.server, self.shutdown_timeout)
            .await;
        info!(drained = report.drained, clean = report.clean, "relay server stopped");
        report
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>, State(state): State<AppState>) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(error = %rejection, "websocket upgrade rejected");
            counter!("relay_upgrade_failures_total").increment(1);
            return rejection.into_response();
        }
    };

    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_failed_upgrade(|error| {
            warn!(error = %error, "websocket upgrade failed");
            counter!("relay_upgrade_failures_total").increment(1);
        })
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Register a session for a freshly upgraded socket and relay until it ends.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = admit_session(&state);
    run_session(socket, session, state.queues, state.relay, state.registry).await;
}

/// Register a new session. If shutdown began after the upgrade was accepted,
/// the session starts out draining so it closes with `Shutdown` right away.
///
/// Registering before the token check pairs with the coordinator cancelling
/// before `drain_all`: either `drain_all` sees this session or the check here
/// sees the cancelled token.
fn admit_session(state: &AppState) -> Arc<Session> {
    let session = state.registry.register();
    if state.shutdown.is_cancelled() && session.begin_draining(CloseReason::Shutdown) {
        debug!(session_id = %session.id(), "upgrade completed during shutdown, draining");
    }
    session
}

/// Liveness probe. Does not touch relay state.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use sockrelay_core::EngineQueues;
    use tower::ServiceExt;

    use super::*;
    use crate::session::SessionState;

    fn state(config: &ServerConfig, queues: &EngineQueues) -> AppState {
        AppState {
            queues: queues.relay.clone(),
            registry: Arc::new(SessionRegistry::new()),
            relay: config.relay.clone(),
            max_message_size: config.max_message_size,
            shutdown: CancellationToken::new(),
        }
    }

    fn router(config: &ServerConfig) -> (Router, EngineQueues) {
        let queues = EngineQueues::new(8);
        (build_router(state(config, &queues), config), queues)
    }

    #[test]
    fn admitted_session_starts_connecting() {
        let queues = EngineQueues::new(8);
        let state = state(&ServerConfig::default(), &queues);
        let session = admit_session(&state);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.done().is_cancelled());
        assert_eq!(state.registry.count(), 1);
    }

    #[test]
    fn session_admitted_after_shutdown_drain_is_drained() {
        let queues = EngineQueues::new(8);
        let state = state(&ServerConfig::default(), &queues);

        // shutdown ran before the upgrade finished: token cancelled, drain found nothing
        state.shutdown.cancel();
        assert_eq!(state.registry.drain_all(CloseReason::Shutdown), 0);

        let session = admit_session(&state);
        assert_eq!(session.state(), SessionState::Draining);
        assert_eq!(session.close_reason(), Some(CloseReason::Shutdown));
        assert!(session.done().is_cancelled());
    }

    #[test]
    fn session_admitted_before_drain_is_drained_by_it() {
        let queues = EngineQueues::new(8);
        let state = state(&ServerConfig::default(), &queues);

        let session = admit_session(&state);
        state.shutdown.cancel();
        assert_eq!(state.registry.drain_all(CloseReason::Shutdown), 1);
        assert_eq!(session.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (app, _queues) = router(&ServerConfig::default());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn plain_get_on_ws_path_is_rejected() {
        let (app, _queues) = router(&ServerConfig::default());
        let resp = app
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error(), "{}", resp.status());
    }

    #[tokio::test]
    async fn custom_paths_are_routed() {
        let config = ServerConfig {
            health_path: "/livez".to_string(),
            ws_path: "/tunnel".to_string(),
            ..ServerConfig::default()
        };
        let (app, _queues) = router(&config);

        let resp = app
            .clone()
            .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let queues = EngineQueues::new(8);
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let handle = start(config, queues.relay.clone()).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.sessions().is_empty());

        let report = handle.shutdown().await;
        assert_eq!(report, ShutdownReport { drained: 0, clean: true });
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tracing::{debug, field, info, info_span, Instrument, Span};

use netherlink_auth::TokenVerifier;
use netherlink_store::SocialStore;

use crate::config::ServerConfig;
use crate::handlers::HandlerContext;
use crate::health::health_check;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;
use crate::router;
use crate::session::{Outbound, Session};
use crate::shutdown::ShutdownCoordinator;

pub const SHUTDOWN_NOTICE: &str = "server shutting down";

/// How long the writer may spend flushing queued frames after close.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: HandlerContext,
    pub config: Arc<ServerConfig>,
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
    pub shutdown: CancellationToken,
    pub connections: TaskTracker,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// The relay: collaborators plus configuration, started with [`RelayServer::start`].
pub struct RelayServer {
    config: ServerConfig,
    store: Arc<dyn SocialStore>,
    verifier: Arc<dyn TokenVerifier>,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SocialStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            config,
            store,
            verifier,
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Bind and start serving. Returns once the listener is bound.
    pub async fn start(self) -> Result<ServerHandle, std::io::Error> {
        let registry = Arc::new(ConnectionRegistry::new(
            self.config.outbound_queue,
            self.config.auth_timeout,
        ));
        let coordinator = ShutdownCoordinator::new();
        let connections = TaskTracker::new();

        let state = AppState {
            ctx: HandlerContext {
                registry: Arc::clone(&registry),
                store: self.store,
                verifier: self.verifier,
            },
            config: Arc::new(self.config.clone()),
            metrics: self.metrics,
            start_time: Instant::now(),
            shutdown: coordinator.token(),
            connections: connections.clone(),
        };

        let router = build_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "netherlink relay started");

        let stop = coordinator.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "server error");
            }
        });

        Ok(ServerHandle {
            port: local_addr.port(),
            registry,
            coordinator,
            connections,
            server,
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }
}

/// Handle returned by [`RelayServer::start`].
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ConnectionRegistry>,
    coordinator: ShutdownCoordinator,
    connections: TaskTracker,
    server: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.coordinator.token()
    }

    /// Stop accepting, close every session, then wait for connection tasks
    /// up to the configured timeout.
    pub async fn shutdown(self) {
        self.coordinator.shutdown();
        let closed = self.registry.close_all(SHUTDOWN_NOTICE);
        info!(closed, "closing sessions for shutdown");

        self.connections.close();
        let tracker = self.connections.clone();
        let drain = tokio::spawn(async move { tracker.wait().await });
        self.coordinator
            .graceful_shutdown(vec![self.server, drain], self.shutdown_timeout)
            .await;
        info!("netherlink relay stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let tracker = state.connections.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| tracker.track_future(handle_socket(socket, state)))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_check(
        state.start_time,
        state.ctx.registry.connection_count(),
        state.ctx.registry.online_count(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// One WebSocket connection, from upgrade to teardown.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session, rx) = state.ctx.registry.admit();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let span = info_span!("connection", conn_id = %session.conn_id(), uid = field::Empty);
    run_connection(socket, Arc::clone(&session), rx, &state)
        .instrument(span)
        .await;

    let _ = session.close();
    state.ctx.registry.release(&session);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.age().as_secs_f64());
}

async fn run_connection(
    socket: WebSocket,
    session: Arc<Session>,
    rx: mpsc::Receiver<Outbound>,
    state: &AppState,
) {
    info!("client connected");
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(
        write_loop(sink, rx, session.closed_token(), state.config.heartbeat_interval)
            .in_current_span(),
    );

    read_loop(stream, &session, state).await;

    // Cancels the writer's close branch; it flushes and sends Close.
    let _ = session.close();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(dropped_frames = session.dropped_frames(), "client disconnected");
}

async fn read_loop(mut stream: SplitStream<WebSocket>, session: &Arc<Session>, state: &AppState) {
    let closed = session.closed_token();
    let heartbeat_timeout = state.config.heartbeat_timeout;
    let mut watchdog = tokio::time::interval(state.config.heartbeat_interval);
    watchdog.tick().await;
    let mut uid_recorded = false;

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = watchdog.tick() => {
                if session.idle_for() > heartbeat_timeout {
                    info!(idle_secs = session.idle_for().as_secs(), "heartbeat timeout");
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.touch();
                    router::route(&state.ctx, session, text.as_str()).await;
                    if !uid_recorded {
                        if let Some(uid) = session.user_id() {
                            let _ = Span::current().record("uid", field::display(&uid));
                            uid_recorded = true;
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    session.touch();
                    router::route(&state.ctx, session, "").await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => session.touch(),
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
            }
        }
    }
}

/// Forward queued frames and periodic pings to the socket until the
/// session closes, then flush what is left and send Close.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    heartbeat_interval: Duration,
) {
    let mut ping = tokio::time::interval(heartbeat_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => break,
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
                tracing::trace!("sent ping");
            }
        }
    }

    // Notices queued just before close (eviction, timeout) go out first.
    while let Ok(text) = rx.try_recv() {
        if sink.send(Message::Text(text.as_str().into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use netherlink_auth::JwtAuth;
    use netherlink_store::SqliteStore;

    fn relay() -> RelayServer {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let auth = JwtAuth::new("secret", "netherlink", Duration::from_secs(60));
        RelayServer::new(ServerConfig::default(), store, Arc::new(auth))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = relay().start().await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["online_users"], 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_disabled_without_recorder() {
        let handle = relay().start().await.unwrap();
        let url = format!("http://127.0.0.1:{}/metrics", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_rendered_from_handle() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = relay().with_metrics(recorder.handle()).start().await.unwrap();
        let url = format!("http://127.0.0.1:{}/metrics", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_token_cancelled() {
        let handle = relay().start().await.unwrap();
        let token = handle.shutdown_token();
        assert!(!token.is_cancelled());
        handle.shutdown().await;
        assert!(token.is_cancelled());
    }
}

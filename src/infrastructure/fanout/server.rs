//! Fan-out WebSocket Server
//!
//! Serves `/ws` for downstream subscribers. Each upgrade authenticates the
//! tenant via its API key, loads the tenant's transform config, and joins
//! the tenant's connection set. A single broadcaster task snapshots the
//! cache every second and writes one JSON frame per snapshot item to every
//! connection, applying the tenant's per-symbol transform on the way out.
//!
//! Inbound frames from subscribers are discarded; the read pump exists only
//! for liveness. Pong frames extend the read deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::ClientRegistry;
use crate::application::ports::{SnapshotSource, TenantDirectory};
use crate::domain::transform::ClientConfig;
use crate::infrastructure::metrics::{ErrorKind, record_connection_opened, record_error};

/// Header carrying the downstream API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Maximum size of an inbound frame from a subscriber.
const READ_LIMIT: usize = 512;

/// Read deadline; extended by each pong.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Interval between broadcast ticks.
const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Error Type
// =============================================================================

/// Fan-out server errors.
#[derive(Debug, thiserror::Error)]
pub enum FanoutServerError {
    /// HTTP server failed while running.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state behind the `/ws` route and the broadcaster.
pub struct FanoutState {
    /// Tenant authentication and config lookup.
    pub directory: Arc<dyn TenantDirectory>,
    /// Source of the per-symbol snapshot.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Live tenants and their connections.
    pub registry: ClientRegistry,
}

// =============================================================================
// Fan-out Server
// =============================================================================

/// Downstream WebSocket server plus its broadcaster.
pub struct FanoutServer {
    state: Arc<FanoutState>,
    broadcast_interval: Duration,
    cancel: CancellationToken,
}

impl FanoutServer {
    /// Create a new fan-out server.
    #[must_use]
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        snapshots: Arc<dyn SnapshotSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(FanoutState {
                directory,
                snapshots,
                registry: ClientRegistry::new(),
            }),
            broadcast_interval: BROADCAST_INTERVAL,
            cancel,
        }
    }

    /// Override the broadcast interval.
    #[must_use]
    pub const fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    /// Get a handle to the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<FanoutState> {
        Arc::clone(&self.state)
    }

    /// Serve the given listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `FanoutServerError` if the HTTP server encounters a fatal
    /// error while running.
    pub async fn run(self, listener: TcpListener) -> Result<(), FanoutServerError> {
        let broadcaster = tokio::spawn(broadcaster_loop(
            Arc::clone(&self.state),
            self.broadcast_interval,
            self.cancel.clone(),
        ));

        let app = Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(Arc::clone(&self.state));

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "fan-out server listening");
        }

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| FanoutServerError::ServerFailed(e.to_string()));

        let _ = broadcaster.await;
        tracing::info!("fan-out server stopped");
        result
    }
}

// =============================================================================
// Connection Upgrade
// =============================================================================

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<FanoutState>>,
) -> Response {
    let Some(api_key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, "missing api key").into_response();
    };

    let client_id = match state.directory.validate_api_key(api_key).await {
        Ok(client_id) => client_id,
        Err(e) => {
            record_error(ErrorKind::Auth);
            tracing::warn!(error = %e, "rejected downstream connection");
            return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
        }
    };

    let config = match state.directory.fetch_client_config(&client_id).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(client = %client_id, error = %e, "config lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "server error").into_response();
        }
    };

    ws.max_message_size(READ_LIMIT)
        .on_upgrade(move |socket| handle_connection(socket, state, client_id, config))
        .into_response()
}

async fn handle_connection(
    socket: WebSocket,
    state: Arc<FanoutState>,
    client_id: String,
    config: Option<ClientConfig>,
) {
    let (sink, stream) = socket.split();

    let client = state.registry.get_or_create(&client_id, config);
    let conn_id = state.registry.next_connection_id();
    client.add_conn(conn_id, sink).await;
    record_connection_opened();
    tracing::info!(client = %client_id, conn = conn_id, "downstream connection opened");

    read_pump(stream).await;

    state.registry.release(&client_id, conn_id).await;
    tracing::info!(client = %client_id, conn = conn_id, "downstream connection closed");
}

/// Liveness-only read loop. Frames are discarded; a pong extends the
/// deadline. Any read error, close, or expired deadline ends the pump, and
/// teardown deregisters the connection.
async fn read_pump(mut stream: SplitStream<WebSocket>) {
    let mut deadline = Instant::now() + READ_DEADLINE;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, stream.next()).await {
            Err(_) => return, // deadline expired
            Ok(None) => return,
            Ok(Some(Err(_))) => return,
            Ok(Some(Ok(Message::Pong(_)))) => {
                deadline = Instant::now() + READ_DEADLINE;
            }
            Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Ok(_))) => {
                // Discarded; inbound frames exist only to keep the
                // connection alive.
            }
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// The single broadcaster task: every tick, fetch the full snapshot and
/// fan it out to every registered client.
async fn broadcaster_loop(
    state: Arc<FanoutState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("broadcaster stopped");
                return;
            }
            _ = ticker.tick() => {
                broadcast_tick(&state).await;
            }
        }
    }
}

async fn broadcast_tick(state: &FanoutState) {
    if state.registry.is_empty() {
        return;
    }

    let snapshot = match state.snapshots.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch snapshot");
            return;
        }
    };

    if snapshot.is_empty() {
        return;
    }

    // The registry is snapshotted first so no shard lock is held while
    // writing to sockets; only the per-client lock is held during writes.
    for client in state.registry.clients_snapshot() {
        client.send_snapshot(&snapshot).await;
    }
}

//! Client Registry
//!
//! Tenants with at least one live downstream connection. The registry is a
//! concurrent map keyed by tenant id; each [`Client`] guards its own
//! connection set with a per-client lock, so the broadcaster never writes to
//! a socket while holding any registry-wide lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::sync::Mutex;

use crate::domain::market_data::{MarketData, normalize};
use crate::domain::transform::{ClientConfig, apply_transform};
use crate::infrastructure::metrics::{
    ErrorKind, record_connection_closed, record_error,
};

/// Identifier of a single downstream connection.
pub type ConnectionId = u64;

/// Write half of a downstream WebSocket.
pub type ConnectionSink = SplitSink<WebSocket, Message>;

// =============================================================================
// Client
// =============================================================================

/// A tenant with live downstream connections.
///
/// The transform config is loaded at the tenant's first upgrade and kept for
/// the client's lifetime in the registry.
pub struct Client {
    id: String,
    config: Option<ClientConfig>,
    conns: Mutex<HashMap<ConnectionId, ConnectionSink>>,
}

impl Client {
    fn new(id: String, config: Option<ClientConfig>) -> Self {
        Self {
            id,
            config,
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Get the tenant id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a connection's write half.
    pub async fn add_conn(&self, conn_id: ConnectionId, sink: ConnectionSink) {
        self.conns.lock().await.insert(conn_id, sink);
    }

    /// Remove a connection, returning its write half if still present.
    pub async fn remove_conn(&self, conn_id: ConnectionId) -> Option<ConnectionSink> {
        self.conns.lock().await.remove(&conn_id)
    }

    /// Whether the connection set is empty.
    pub async fn is_empty(&self) -> bool {
        self.conns.lock().await.is_empty()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.conns.lock().await.len()
    }

    /// Write one frame per snapshot item to every connection, applying the
    /// tenant's transform per symbol.
    ///
    /// A write error closes that connection and skips its remaining items
    /// for this tick; other connections are unaffected. Failed connections
    /// are removed from the set here; the empty-client registry cleanup
    /// happens on read-pump teardown.
    pub async fn send_snapshot(&self, items: &[MarketData]) {
        let mut conns = self.conns.lock().await;
        let mut dead: Vec<ConnectionId> = Vec::new();

        for (&conn_id, sink) in conns.iter_mut() {
            for item in items {
                let mut flat = normalize(item);
                if let Some(symbol_config) = self
                    .config
                    .as_ref()
                    .and_then(|config| config.symbols.get(&item.name))
                {
                    apply_transform(&mut flat, symbol_config);
                }

                let frame = match serde_json::to_string(&flat) {
                    Ok(frame) => frame,
                    Err(e) => {
                        record_error(ErrorKind::Marshal);
                        tracing::warn!(symbol = %item.name, error = %e, "skipping unencodable frame");
                        continue;
                    }
                };

                if sink.send(Message::Text(frame.into())).await.is_err() {
                    dead.push(conn_id);
                    break;
                }
            }
        }

        for conn_id in dead {
            if let Some(mut sink) = conns.remove(&conn_id) {
                let _ = sink.close().await;
                record_connection_closed();
                tracing::info!(client = %self.id, conn = conn_id, "dropped unwritable connection");
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrent map of tenant id to [`Client`].
///
/// At most one entry exists per tenant; creation goes through a
/// load-or-store so racing upgrades converge on one canonical entry.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<Client>>,
    next_conn_id: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the canonical client for a tenant. The config of
    /// the first upgrade wins for the client's lifetime.
    pub fn get_or_create(
        &self,
        client_id: &str,
        config: Option<ClientConfig>,
    ) -> Arc<Client> {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                Arc::new(Client::new(client_id.to_string(), config))
            })
            .value()
            .clone()
    }

    /// Allocate a fresh connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove a connection from its tenant and drop the tenant entry when
    /// its connection set becomes empty. Called on read-pump teardown.
    pub async fn release(&self, client_id: &str, conn_id: ConnectionId) {
        let Some(client) = self.clients.get(client_id).map(|entry| entry.value().clone())
        else {
            return;
        };

        if let Some(mut sink) = client.remove_conn(conn_id).await {
            let _ = sink.close().await;
            record_connection_closed();
        }

        if client.is_empty().await {
            self.clients.remove(client_id);
        }
    }

    /// Whether a tenant is present.
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Look up a tenant's client.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Number of registered tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry has no tenants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Collect the current clients. The broadcaster iterates this snapshot
    /// so no registry shard lock is held across a socket write.
    #[must_use]
    pub fn clients_snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Fan-out Server Integration Tests
//!
//! Binds the real server on an ephemeral port and drives it with real
//! WebSocket clients: authentication rejection, per-tenant transformation on
//! the egress path, fault isolation between connections, and registry
//! lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;

use market_relay::{
    AuthError, ClientConfig, DirectoryError, FanoutServer, FanoutState, MarketData,
    SnapshotError, SnapshotSource, SymbolConfig, TenantDirectory, ValueOp, ValueRule,
};

// =============================================================================
// Port Doubles
// =============================================================================

/// A directory with a fixed key → tenant mapping and per-tenant configs.
struct StaticDirectory {
    keys: HashMap<String, String>,
    configs: HashMap<String, ClientConfig>,
}

#[async_trait]
impl TenantDirectory for StaticDirectory {
    async fn validate_api_key(&self, api_key: &str) -> Result<String, AuthError> {
        self.keys
            .get(api_key)
            .cloned()
            .ok_or(AuthError::InvalidKey)
    }

    async fn fetch_client_config(
        &self,
        client_id: &str,
    ) -> Result<Option<ClientConfig>, DirectoryError> {
        Ok(self.configs.get(client_id).cloned())
    }
}

/// A snapshot source returning a fixed item list.
struct StaticSnapshots {
    items: Vec<MarketData>,
}

#[async_trait]
impl SnapshotSource for StaticSnapshots {
    async fn snapshot(&self) -> Result<Vec<MarketData>, SnapshotError> {
        Ok(self.items.clone())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn usdsgd_item() -> MarketData {
    MarketData {
        name: "USDSGD".to_string(),
        timestamp: 10,
        exchange: "X".to_string(),
        data: json!({"data": {"bid": 1.25, "raw": "r"}})
            .as_object()
            .unwrap()
            .clone(),
    }
}

fn tenant_a_config() -> ClientConfig {
    ClientConfig {
        symbols: HashMap::from([(
            "USDSGD".to_string(),
            SymbolConfig {
                value_rules: HashMap::from([(
                    "bid".to_string(),
                    ValueRule {
                        op: ValueOp::Multiply,
                        value: 2.0,
                    },
                )]),
                rename_fields: HashMap::from([("raw".to_string(), "r2".to_string())]),
                remove_fields: vec!["exchange".to_string()],
                override_fields: HashMap::from([("venue".to_string(), json!("Z"))]),
                use_current_ts: false,
            },
        )]),
    }
}

async fn start_server(
    directory: StaticDirectory,
    snapshots: StaticSnapshots,
) -> (SocketAddr, Arc<FanoutState>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let server = FanoutServer::new(
        Arc::new(directory),
        Arc::new(snapshots),
        cancel.clone(),
    )
    .with_broadcast_interval(Duration::from_millis(50));
    let state = server.state();

    tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state, cancel)
}

fn directory_with_tenant_a() -> StaticDirectory {
    StaticDirectory {
        keys: HashMap::from([("key-a".to_string(), "tenant-a".to_string())]),
        configs: HashMap::from([("tenant-a".to_string(), tenant_a_config())]),
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: SocketAddr, api_key: Option<&str>) -> Result<WsClient, tungstenite::Error> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(key) = api_key {
        request
            .headers_mut()
            .insert("x-api-key", key.parse().unwrap());
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn next_text_frame(client: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Wait until the condition holds or a few seconds pass.
async fn wait_until(mut condition: impl AsyncFnMut() -> bool) {
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn missing_and_invalid_keys_are_rejected_with_401() {
    let (addr, state, cancel) = start_server(
        directory_with_tenant_a(),
        StaticSnapshots { items: vec![] },
    )
    .await;

    let err = connect(addr, None).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP error, got {other:?}"),
    }

    let err = connect(addr, Some("bad")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP error, got {other:?}"),
    }

    assert!(state.registry.is_empty());
    cancel.cancel();
}

#[tokio::test]
async fn frames_are_transformed_per_tenant() {
    let (addr, _state, cancel) = start_server(
        directory_with_tenant_a(),
        StaticSnapshots {
            items: vec![usdsgd_item()],
        },
    )
    .await;

    let mut client = connect(addr, Some("key-a")).await.unwrap();
    let frame = next_text_frame(&mut client).await;

    assert_eq!(frame["symbol"], json!("USDSGD"));
    assert_eq!(frame["timestamp"], json!(10));
    assert_eq!(frame["bid"], json!(2.5));
    assert_eq!(frame["r2"], json!("r"));
    assert_eq!(frame["venue"], json!("Z"));
    assert!(frame.get("exchange").is_none());
    assert!(frame.get("raw").is_none());

    cancel.cancel();
}

#[tokio::test]
async fn unconfigured_tenant_gets_passthrough() {
    let directory = StaticDirectory {
        keys: HashMap::from([("key-b".to_string(), "tenant-b".to_string())]),
        configs: HashMap::new(),
    };
    let (addr, _state, cancel) = start_server(
        directory,
        StaticSnapshots {
            items: vec![usdsgd_item()],
        },
    )
    .await;

    let mut client = connect(addr, Some("key-b")).await.unwrap();
    let frame = next_text_frame(&mut client).await;

    assert_eq!(frame["symbol"], json!("USDSGD"));
    assert_eq!(frame["exchange"], json!("X"));
    assert_eq!(frame["bid"], json!(1.25));
    assert_eq!(frame["raw"], json!("r"));

    cancel.cancel();
}

#[tokio::test]
async fn dropped_connection_does_not_affect_its_tenant_peers() {
    let (addr, state, cancel) = start_server(
        directory_with_tenant_a(),
        StaticSnapshots {
            items: vec![usdsgd_item()],
        },
    )
    .await;

    let mut conn_a = connect(addr, Some("key-a")).await.unwrap();
    let mut conn_b = connect(addr, Some("key-a")).await.unwrap();

    // Both connections receive ticks.
    let _ = next_text_frame(&mut conn_a).await;
    let _ = next_text_frame(&mut conn_b).await;

    let client = state.registry.get("tenant-a").unwrap();
    assert_eq!(client.connection_count().await, 2);

    // Tear down A abruptly; the server notices via read error or failed write.
    drop(conn_a);
    wait_until(async || client.connection_count().await == 1).await;

    // B keeps receiving subsequent ticks and the tenant entry survives.
    let frame = next_text_frame(&mut conn_b).await;
    assert_eq!(frame["symbol"], json!("USDSGD"));
    assert!(state.registry.contains("tenant-a"));

    cancel.cancel();
}

#[tokio::test]
async fn registry_drops_tenant_when_last_connection_closes() {
    let (addr, state, cancel) = start_server(
        directory_with_tenant_a(),
        StaticSnapshots {
            items: vec![usdsgd_item()],
        },
    )
    .await;

    let mut client = connect(addr, Some("key-a")).await.unwrap();
    let _ = next_text_frame(&mut client).await;
    assert!(state.registry.contains("tenant-a"));

    drop(client);
    wait_until(async || state.registry.is_empty()).await;

    cancel.cancel();
}

#[tokio::test]
async fn two_tenants_are_isolated() {
    let directory = StaticDirectory {
        keys: HashMap::from([
            ("key-a".to_string(), "tenant-a".to_string()),
            ("key-b".to_string(), "tenant-b".to_string()),
        ]),
        configs: HashMap::from([("tenant-a".to_string(), tenant_a_config())]),
    };
    let (addr, state, cancel) = start_server(
        directory,
        StaticSnapshots {
            items: vec![usdsgd_item()],
        },
    )
    .await;

    let mut conn_a = connect(addr, Some("key-a")).await.unwrap();
    let mut conn_b = connect(addr, Some("key-b")).await.unwrap();

    let frame_a = next_text_frame(&mut conn_a).await;
    let frame_b = next_text_frame(&mut conn_b).await;

    // Tenant A sees its transform; tenant B sees the raw flat record.
    assert_eq!(frame_a["bid"], json!(2.5));
    assert_eq!(frame_b["bid"], json!(1.25));
    assert_eq!(state.registry.len(), 2);

    cancel.cancel();
}

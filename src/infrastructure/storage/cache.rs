//! Cache Sink
//!
//! Redis adapter holding the latest-known record per symbol. Keys are raw
//! symbol names, values are the JSON encoding of the record, and every entry
//! carries the configured TTL.
//!
//! Batch writes are issued as one pipelined round-trip. The snapshot read
//! path scans all keys and skips missing or corrupt entries rather than
//! failing the whole snapshot.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use crate::application::ports::{BatchSink, SinkError, SnapshotError, SnapshotSource};
use crate::domain::market_data::MarketData;
use crate::infrastructure::config::RedisSettings;
use crate::infrastructure::metrics::{ErrorKind, record_error};

/// Default Redis port when the configured address omits one.
const DEFAULT_REDIS_PORT: u16 = 6379;

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Initial connection or PING probe failed.
    #[error("cache connection failed: {0}")]
    Connect(#[source] redis::RedisError),

    /// A command or pipeline failed.
    #[error("cache command failed: {0}")]
    Command(#[source] redis::RedisError),
}

// =============================================================================
// Cache
// =============================================================================

/// Redis-backed cache of the latest record per symbol.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisCache {
    /// Connect to Redis and verify the connection with a PING.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connect`] if the server is unreachable or the
    /// probe fails; this is fatal at startup.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
        let (host, port) = split_addr(&settings.addr);

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: settings.db,
                username: None,
                password: settings.password.clone(),
                ..RedisConnectionInfo::default()
            },
        };

        let client = redis::Client::open(info).map_err(CacheError::Connect)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Connect)?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(CacheError::Connect)?;

        tracing::info!(addr = %settings.addr, db = settings.db, "connected to Redis");
        Ok(Self {
            conn,
            ttl: settings.ttl,
        })
    }

    /// Pipeline one SET per record, skipping zero timestamps and records
    /// that fail to encode.
    async fn set_batch(&self, batch: &[MarketData]) -> Result<(), CacheError> {
        let mut pipe = redis::pipe();
        let mut queued = 0usize;

        for record in batch {
            if record.timestamp == 0 {
                continue;
            }

            match serde_json::to_string(record) {
                Ok(value) => {
                    pipe.set_ex(&record.name, value, self.ttl.as_secs()).ignore();
                    queued += 1;
                }
                Err(e) => {
                    record_error(ErrorKind::Marshal);
                    tracing::warn!(symbol = %record.name, error = %e, "skipping unencodable record");
                }
            }
        }

        if queued == 0 {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::Command)
    }

    /// Collect every key currently in the cache.
    async fn scan_keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, chunk): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .query_async(&mut conn)
                .await
                .map_err(CacheError::Command)?;

            keys.extend(chunk);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl BatchSink for RedisCache {
    async fn insert_batch(&self, batch: &[MarketData]) -> Result<(), SinkError> {
        self.set_batch(batch)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for RedisCache {
    async fn snapshot(&self) -> Result<Vec<MarketData>, SnapshotError> {
        let keys = self
            .scan_keys()
            .await
            .map_err(|e| SnapshotError::new(e.to_string()))?;

        let mut conn = self.conn.clone();
        let mut all = Vec::with_capacity(keys.len());

        for key in keys {
            let value: Option<String> = match redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to read cache entry");
                    continue;
                }
            };

            // Entries can expire between SCAN and GET.
            let Some(value) = value else { continue };

            match serde_json::from_str::<MarketData>(&value) {
                Ok(data) => all.push(data),
                Err(e) => {
                    record_error(ErrorKind::Unmarshal);
                    tracing::warn!(key = %key, error = %e, "skipping corrupt cache entry");
                }
            }
        }

        Ok(all)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Split a `host:port` address, defaulting the port when absent.
fn split_addr(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (addr.to_string(), DEFAULT_REDIS_PORT),
        },
        None => (addr.to_string(), DEFAULT_REDIS_PORT),
    }
}

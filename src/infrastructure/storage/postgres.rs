//! Relational Store
//!
//! Postgres adapter backing three concerns:
//!
//! - append-only history of accepted records (`market_data`)
//! - tenant transform configs (`clients_configs`)
//! - API-key authentication (`api_keys`)
//!
//! Schema bootstrap is an operator task; see `migrations/001_init.sql`.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::application::ports::{
    AuthError, BatchSink, DirectoryError, SinkError, TenantDirectory,
};
use crate::domain::market_data::MarketData;
use crate::domain::transform::ClientConfig;

/// Table holding accepted records.
const MARKET_DATA_TABLE: &str = "market_data";
/// Table holding tenant transform configs.
const CLIENTS_CONFIGS_TABLE: &str = "clients_configs";
/// Table holding hashed API keys.
const API_KEYS_TABLE: &str = "api_keys";

/// Connection pool sizing.
const MAX_CONNECTIONS: u32 = 25;
/// Maximum lifetime of a pooled connection.
const CONNECTION_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the relational store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Initial connection failed.
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),

    /// Batch insert failed; the transaction was rolled back.
    #[error("batch insert failed: {0}")]
    Insert(#[source] sqlx::Error),
}

// =============================================================================
// Key Hashing
// =============================================================================

/// Derive the lowercase hex SHA-256 digest of an API key.
#[must_use]
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

// =============================================================================
// Store
// =============================================================================

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connect`] if the pool cannot be established;
    /// this is fatal at startup.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .max_lifetime(CONNECTION_MAX_LIFETIME)
            .connect(database_url)
            .await
            .map_err(StoreError::Connect)?;

        tracing::info!(max_connections = MAX_CONNECTIONS, "connected to Postgres");
        Ok(Self { pool })
    }

    /// Atomically append a batch, skipping records with a zero timestamp.
    ///
    /// # Errors
    ///
    /// Any per-row failure rolls back the whole batch and returns
    /// [`StoreError::Insert`]; there are no partial commits.
    async fn insert_market_data(&self, batch: &[MarketData]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Insert)?;

        let sql = format!(
            "INSERT INTO {MARKET_DATA_TABLE} (name, timestamp, exchange, data) \
             VALUES ($1, $2, $3, $4)"
        );

        for record in batch {
            if record.timestamp == 0 {
                continue;
            }

            sqlx::query(&sql)
                .bind(&record.name)
                .bind(record.timestamp)
                .bind(&record.exchange)
                .bind(Json(&record.data))
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Insert)?;
        }

        tx.commit().await.map_err(StoreError::Insert)
    }

    /// Best-effort `last_used_at` update, spawned without lifecycle tracking.
    /// Failures never affect the authentication result.
    fn touch_last_used(&self, key_hash: String) {
        let pool = self.pool.clone();
        let sql = format!("UPDATE {API_KEYS_TABLE} SET last_used_at = now() WHERE key_hash = $1");

        tokio::spawn(async move {
            if let Err(e) = sqlx::query(&sql).bind(&key_hash).execute(&pool).await {
                tracing::debug!(error = %e, "last_used_at update failed");
            }
        });
    }
}

#[async_trait]
impl BatchSink for PgStore {
    async fn insert_batch(&self, batch: &[MarketData]) -> Result<(), SinkError> {
        self.insert_market_data(batch)
            .await
            .map_err(|e| SinkError::new(e.to_string()))
    }
}

#[async_trait]
impl TenantDirectory for PgStore {
    async fn validate_api_key(&self, api_key: &str) -> Result<String, AuthError> {
        let key_hash = hash_api_key(api_key);

        let sql = format!(
            "SELECT client_id FROM {API_KEYS_TABLE} \
             WHERE key_hash = $1 AND is_active = true"
        );
        let client_id: Option<String> = sqlx::query_scalar(&sql)
            .bind(&key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        match client_id {
            Some(client_id) => {
                self.touch_last_used(key_hash);
                Ok(client_id)
            }
            None => Err(AuthError::InvalidKey),
        }
    }

    async fn fetch_client_config(
        &self,
        client_id: &str,
    ) -> Result<Option<ClientConfig>, DirectoryError> {
        let sql = format!("SELECT config FROM {CLIENTS_CONFIGS_TABLE} WHERE id = $1");

        let row: Option<Json<ClientConfig>> = sqlx::query_scalar(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;

        Ok(row.map(|Json(config)| config))
    }
}

// =============================================================================
// Tests
// =============================================================================

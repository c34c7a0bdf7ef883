//! Port Interfaces
//!
//! Contracts between the pipeline/fan-out core and the storage adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`BatchSink`]: durable append of a validated batch (store and cache)
//! - [`TenantDirectory`]: API-key validation and tenant config lookup
//! - [`SnapshotSource`]: latest-known records per symbol for broadcasting

use async_trait::async_trait;

use crate::domain::market_data::MarketData;
use crate::domain::transform::ClientConfig;

// =============================================================================
// Errors
// =============================================================================

/// Error from a batch sink. The adapter's own error description is carried
/// through for logging; the caller's retry policy does not inspect it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
}

impl SinkError {
    /// Wrap an adapter error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The key hash is unknown or the key is inactive.
    #[error("invalid api key")]
    InvalidKey,

    /// The directory backend failed; distinct from a rejected key.
    #[error("auth backend error: {0}")]
    Backend(String),
}

/// Tenant config lookup failure (backend error, not absence).
#[derive(Debug, thiserror::Error)]
#[error("config lookup failed: {message}")]
pub struct DirectoryError {
    message: String,
}

impl DirectoryError {
    /// Wrap a backend error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Snapshot read failure.
#[derive(Debug, thiserror::Error)]
#[error("snapshot failed: {message}")]
pub struct SnapshotError {
    message: String,
}

impl SnapshotError {
    /// Wrap a backend error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// A durable destination for batches of validated records.
///
/// Implementations must treat the batch atomically where the medium allows
/// (the relational store) or per-record with skip-on-marshal-failure (the
/// cache). Records with `timestamp == 0` are skipped by every sink.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Append a batch. A returned error fails the whole batch and is retried
    /// by the caller.
    async fn insert_batch(&self, batch: &[MarketData]) -> Result<(), SinkError>;
}

/// Tenant lookup used by the fan-out server at connection upgrade.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolve an opaque API key to a tenant id.
    async fn validate_api_key(&self, api_key: &str) -> Result<String, AuthError>;

    /// Load a tenant's transform config. Absence is not an error; it means
    /// passthrough.
    async fn fetch_client_config(
        &self,
        client_id: &str,
    ) -> Result<Option<ClientConfig>, DirectoryError>;
}

/// Source of the latest-known record per symbol.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the full snapshot, unordered. Missing or corrupt entries are
    /// skipped by the implementation, not surfaced.
    async fn snapshot(&self) -> Result<Vec<MarketData>, SnapshotError>;
}

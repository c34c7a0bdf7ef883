//! Upstream ingest stage: resilient WebSocket client with reconnect.

/// Upstream WebSocket client.
pub mod client;

/// Doubling backoff policy.
pub mod reconnect;

pub use client::{IngestClient, IngestConfig, IngestError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! Market Relay - Market Data Ingestion and Fan-out
//!
//! A service that maintains a persistent upstream WebSocket subscription,
//! validates and normalizes each message, micro-batches them into a
//! relational store and a key/value cache, and fans the latest per-symbol
//! snapshot out to authenticated downstream subscribers with per-tenant
//! egress transformation.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data types
//!   - `market_data`: records, validation, normalization
//!   - `transform`: per-tenant transform rules
//!
//! - **Application**: Port definitions
//!   - `ports`: sink, directory, and snapshot contracts
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `ingest`: upstream WebSocket client with reconnect
//!   - `pipeline`: bounded queue and batching worker pool
//!   - `storage`: Postgres and Redis adapters
//!   - `fanout`: downstream WebSocket server and broadcaster
//!   - `config`, `telemetry`, `metrics`, `ops`: ambient concerns
//!
//! # Data Flow
//!
//! ```text
//! upstream WS ──► Ingestor ──► [bounded queue] ──► Workers ──┬─► Postgres (batch INSERT)
//!                                                            └─► Redis (pipelined SET w/ TTL)
//!                                                                          │
//!                                 Fan-out Server ◄── 1 s snapshot ─────────┘
//!                                 │
//!                                 ├─ auth (api key → tenant)
//!                                 └─ per-tenant transform ──► subscribers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core data types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{
    FlatMarketData, MarketData, ValidationError, exchange_for_symbol, normalize,
};
pub use domain::transform::{ClientConfig, SymbolConfig, ValueOp, ValueRule, apply_transform};

// Ports
pub use application::ports::{
    AuthError, BatchSink, DirectoryError, SinkError, SnapshotError, SnapshotSource,
    TenantDirectory,
};

// Configuration
pub use infrastructure::config::{ConfigError, RedisSettings, ServiceConfig};

// Ingest
pub use infrastructure::ingest::{IngestClient, IngestConfig, IngestError, ReconnectConfig};

// Pipeline
pub use infrastructure::pipeline::{
    QUEUE_CAPACITY, QueueReceiver, QueueSender, WorkerPool, WorkerPoolConfig, bounded,
};

// Storage adapters
pub use infrastructure::storage::{PgStore, RedisCache, hash_api_key};

// Fan-out server
pub use infrastructure::fanout::{Client, ClientRegistry, FanoutServer, FanoutState};

// Metrics
pub use infrastructure::metrics::{init_metrics, get_metrics_handle};

// Telemetry
pub use infrastructure::telemetry::init_from_env as init_telemetry;

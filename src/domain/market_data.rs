//! Market Data Model
//!
//! The record type carried through the whole pipeline: ingested from the
//! upstream feed, batched into the sinks, and flattened on the egress path.
//!
//! The `data` payload is deliberately untyped. The upstream schema treats it
//! as opaque, so it stays a keyed JSON map from ingress to egress.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Market Data Record
// =============================================================================

/// A single market data record as received from the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Symbol name, e.g. `USDSGD`.
    pub name: String,
    /// Event time in milliseconds since epoch.
    pub timestamp: i64,
    /// Venue the symbol trades on; assigned on ingest.
    #[serde(default)]
    pub exchange: String,
    /// Opaque payload forwarded as-is.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

/// Validation failures for inbound records.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Symbol name is empty.
    #[error("name is required")]
    EmptyName,

    /// Timestamp is zero or negative.
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

impl MarketData {
    /// Validate the record against the ingest contract.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the name is empty or the timestamp is
    /// not positive. Invalid records are dropped by the ingestor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.timestamp <= 0 {
            return Err(ValidationError::InvalidTimestamp);
        }
        Ok(())
    }
}

// =============================================================================
// Symbol → Exchange Mapping
// =============================================================================

/// Venue assignments for the symbols we subscribe to.
static SYMBOL_EXCHANGES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("USDSGD", "SGX"),
        ("USDJPY", "EBS"),
        ("EURUSD", "EBS"),
        ("USDCHF", "EBS"),
        ("USDCAD", "EBS"),
        ("GBPUSD", "LMAX"),
        ("AUDUSD", "LMAX"),
        ("NZDUSD", "LMAX"),
        ("BTCUSD", "COINBASE"),
        ("ETHUSD", "COINBASE"),
    ])
});

/// Look up the venue for a symbol, falling back to `"unknown"`.
#[must_use]
pub fn exchange_for_symbol(symbol: &str) -> &'static str {
    SYMBOL_EXCHANGES.get(symbol).copied().unwrap_or("unknown")
}

// =============================================================================
// Flat Market Data
// =============================================================================

/// A single-level keyed map produced by [`normalize`], written as one JSON
/// frame per snapshot item on the egress path.
pub type FlatMarketData = serde_json::Map<String, Value>;

/// Flatten a record for downstream delivery.
///
/// If the payload contains a nested object keyed `"data"`, its entries are
/// copied into the flat map first. The `symbol`, `timestamp`, and `exchange`
/// keys are then set from the record itself and overwrite any collision from
/// the inner block.
#[must_use]
pub fn normalize(item: &MarketData) -> FlatMarketData {
    let mut flat = FlatMarketData::new();

    if let Some(Value::Object(inner)) = item.data.get("data") {
        for (key, value) in inner {
            flat.insert(key.clone(), value.clone());
        }
    }

    flat.insert("symbol".to_string(), Value::from(item.name.clone()));
    flat.insert("timestamp".to_string(), Value::from(item.timestamp));
    flat.insert("exchange".to_string(), Value::from(item.exchange.clone()));

    flat
}

// =============================================================================
// Tests
// =============================================================================

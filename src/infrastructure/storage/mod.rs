//! Storage adapters: the relational store and the key/value cache.

/// Redis cache sink and snapshot source.
pub mod cache;

/// Postgres store, tenant directory, and authenticator.
pub mod postgres;

pub use cache::{CacheError, RedisCache};
pub use postgres::{PgStore, StoreError, hash_api_key};

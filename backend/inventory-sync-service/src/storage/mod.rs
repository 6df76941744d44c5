//! Persistence adapter boundary.
//!
//! The engine only assumes a key-value store with per-key expiry: `get`,
//! `set` (optional TTL) and `delete`. No multi-key atomicity is assumed;
//! serialization of read-modify-write cycles is the engine's job, not the
//! store's.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, optionally expiring after `ttl_seconds`.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of the current record for a product.
pub fn item_key(product_id: &str) -> String {
    format!("inventory:item:{product_id}")
}

/// Key of the bounded change-history list for a product.
pub fn history_key(product_id: &str) -> String {
    format!("inventory:history:{product_id}")
}

/// Key of the set of tracked product ids, used to recompute alerts at
/// startup and to drive the periodic sweep.
pub const INDEX_KEY: &str = "inventory:index";

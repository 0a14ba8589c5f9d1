//! Key-value store boundary

use async_trait::async_trait;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No store endpoints configured")]
    NoEndpoints,

    #[error("Store unreachable: {0}")]
    Unavailable(#[source] BoxError),

    #[error("Store rejected request ({code}): {message}")]
    Rejected { code: u64, message: String },
}

/// RegistryStore performs TTL-bound writes against the registry
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Write `value` under `key`, expiring after `ttl` seconds
    async fn create(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError>;

    /// Rewrite an existing key and reset its TTL; fails if the key is gone
    async fn refresh(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError>;

    /// Remove a single key (non-recursive)
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

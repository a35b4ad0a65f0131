//! Directory client trait definition.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DirectoryError;

/// Expiring key-value store used to publish and resolve mailbox
/// addresses.
///
/// Keys are namespaced by the configured prefix concatenated with the
/// identity; values are `host:port` strings. An entry older than its TTL
/// is considered absent — expiration is the only removal path, there is
/// no explicit delete.
///
/// # Consistency
///
/// The directory is the source of truth; the
/// [`AddressCache`](crate::AddressCache) in front of it is a lagging,
/// TTL-bounded view. Implementations only need read-your-writes
/// consistency per key.
#[async_trait(?Send)]
pub trait DirectoryClient {
    /// Fetch the value stored under `key`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))`: a live entry exists
    /// - `Ok(None)`: no entry, or the entry has expired
    /// - `Err(DirectoryError)`: the directory could not answer
    async fn get(&self, key: &str) -> Result<Option<String>, DirectoryError>;

    /// Store `value` under `key`, clearing any previous expiration.
    async fn set(&self, key: &str, value: &str) -> Result<(), DirectoryError>;

    /// Apply an expiration of `ttl` to the entry under `key`.
    ///
    /// Expiring a missing key is a no-op, matching the usual expiring-KV
    /// contract.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DirectoryError>;
}

//! The Backend Adapter contract: exactly four operations over an opaque
//! key and value type. Two parallel flavours, matching the engine's own
//! sync/aio split — `Backend` for the synchronous front door,
//! `AsyncBackend` for the asynchronous one. Neither trait retries; a
//! failure propagates unchanged to the caller as `Error::Backend`.

pub mod log_file;
pub mod memory;

use async_trait::async_trait;

/// A synchronous key/value backend. Implementations must be deterministic
/// (same key returns same value until the next write/delete to that key)
/// and must reflect a `write`/`delete` to a following `read`/`exists`
/// immediately.
pub trait Backend<K, V> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read(&self, key: &K) -> Result<Option<V>, Self::Error>;
    fn write(&self, key: &K, value: V) -> Result<(), Self::Error>;
    fn delete(&self, key: &K) -> Result<(), Self::Error>;
    fn exists(&self, key: &K) -> Result<bool, Self::Error>;
}

/// The `async` counterpart of [`Backend`], used by the `aio` front door.
#[async_trait]
pub trait AsyncBackend<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send,
{
    type Error: std::error::Error + Send + Sync + 'static;

    async fn read(&self, key: &K) -> Result<Option<V>, Self::Error>;
    async fn write(&self, key: &K, value: V) -> Result<(), Self::Error>;
    async fn delete(&self, key: &K) -> Result<(), Self::Error>;
    async fn exists(&self, key: &K) -> Result<bool, Self::Error>;
}

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::SaplingStorageError;

mod memory;
pub use memory::*;

mod fs;
pub use fs::*;

mod object;
pub use object::*;

/// A [StorageBackend] is a facade over some storage substrate that is able to
/// store and retrieve values by key.
///
/// Once `set` has returned successfully for a key, every later `get` for that
/// key on any clone of the backend must yield the same bytes. Durable
/// backends extend that guarantee across process restarts.
#[async_trait]
pub trait StorageBackend: Clone + Send + Sync {
    /// The key type used by this [StorageBackend]
    type Key: Send + Sync;
    /// The value type able to be stored by this [StorageBackend]
    type Value: Send + Sync;
    /// The error type produced by this [StorageBackend]
    type Error: Into<SaplingStorageError> + Send;

    /// Store the given value against the given key
    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error>;

    /// Retrieve a value (if any) stored against the given key
    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error>;

    /// Release whatever the backend holds open. Further reads and writes may
    /// fail with [SaplingStorageError::Closed].
    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[async_trait]
impl<T> StorageBackend for Arc<Mutex<T>>
where
    T: StorageBackend,
{
    type Key = T::Key;
    type Value = T::Value;
    type Error = T::Error;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let mut inner = self.lock().await;
        inner.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        let inner = self.lock().await;
        inner.get(key).await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        let mut inner = self.lock().await;
        inner.close().await
    }
}

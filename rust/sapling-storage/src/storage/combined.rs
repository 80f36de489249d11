use async_trait::async_trait;

use crate::SaplingStorageError;

use super::StorageBackend;

/// A tee over a local and a remote [StorageBackend].
///
/// Writes go to the remote backend first and reach the local one only once
/// the remote write succeeded, so the local side never holds a value the
/// remote refused. Reads are served by the local backend and fall back to the
/// remote one for keys the local side does not hold.
#[derive(Clone)]
pub struct CombinedStorageBackend<Local, Remote> {
    local: Local,
    remote: Remote,
}

impl<Local, Remote> CombinedStorageBackend<Local, Remote> {
    /// Combine a `local` and a `remote` backend
    pub fn new(local: Local, remote: Remote) -> Self {
        Self { local, remote }
    }

    /// The backend preferred for reads
    pub fn local(&self) -> &Local {
        &self.local
    }

    /// The fallback backend
    pub fn remote(&self) -> &Remote {
        &self.remote
    }
}

#[async_trait]
impl<Local, Remote> StorageBackend for CombinedStorageBackend<Local, Remote>
where
    Local: StorageBackend,
    Local::Key: Clone,
    Local::Value: Clone,
    Remote: StorageBackend<Key = Local::Key, Value = Local::Value>,
{
    type Key = Local::Key;
    type Value = Local::Value;
    type Error = SaplingStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        self.remote
            .set(key.clone(), value.clone())
            .await
            .map_err(Into::<SaplingStorageError>::into)?;
        self.local.set(key, value).await.map_err(Into::into)
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        if let Some(value) = self
            .local
            .get(key)
            .await
            .map_err(Into::<SaplingStorageError>::into)?
        {
            return Ok(Some(value));
        }
        tracing::debug!("Local backend missed; reading from remote");
        self.remote.get(key).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        let local: Result<(), SaplingStorageError> = self.local.close().await.map_err(Into::into);
        let remote = self.remote.close().await.map_err(Into::into);
        local.and(remote)
    }
}

use async_trait::async_trait;

use crate::{SaplingStorageError, TransformPipeline};

use super::StorageBackend;

/// A layer over a [`StorageBackend`] that runs every written value through a
/// [`TransformPipeline`] and inverts it on read.
#[derive(Clone)]
pub struct TransformedStorageBackend<Backend> {
    backend: Backend,
    pipeline: TransformPipeline,
}

impl<Backend> TransformedStorageBackend<Backend> {
    /// Wrap the provided `backend` with the given `pipeline`
    pub fn new(backend: Backend, pipeline: TransformPipeline) -> Self {
        Self { backend, pipeline }
    }

    /// The wrapped backend
    pub fn inner(&self) -> &Backend {
        &self.backend
    }

    /// The configured pipeline
    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }
}

#[async_trait]
impl<Backend> StorageBackend for TransformedStorageBackend<Backend>
where
    Backend: StorageBackend,
    Backend::Value: From<Vec<u8>> + Into<Vec<u8>>,
{
    type Key = Backend::Key;
    type Value = Backend::Value;
    type Error = SaplingStorageError;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let encoded = self.pipeline.encode(value.into())?;
        self.backend
            .set(key, encoded.into())
            .await
            .map_err(|error| error.into())
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        match self
            .backend
            .get(key)
            .await
            .map_err(Into::<SaplingStorageError>::into)?
        {
            Some(value) => Ok(Some(self.pipeline.decode(value.into())?.into())),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.backend.close().await.map_err(|error| error.into())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::{
        MemoryStorageBackend, StorageBackend, TransformPipeline, TransformedStorageBackend,
    };

    #[tokio::test]
    async fn it_stores_transformed_bytes() -> Result<()> {
        let raw = MemoryStorageBackend::<Vec<u8>, Vec<u8>>::default();
        let mut backend = TransformedStorageBackend::new(
            raw.clone(),
            TransformPipeline::from_ids(&["brotli", "checksum"])?,
        );
        let value = vec![42u8; 4096];

        backend.set(vec![1], value.clone()).await?;

        let stored = raw.get(&vec![1]).await?.unwrap_or_default();
        assert_ne!(stored, value);
        assert_eq!(backend.get(&vec![1]).await?, Some(value));
        assert_eq!(backend.get(&vec![2]).await?, None);

        Ok(())
    }
}

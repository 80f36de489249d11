use std::sync::Arc;

use sapling_node::NodeFactory;
use sapling_storage::{SaplingStorageError, StorageBackend};

use crate::{Bucket, BucketKey, SaplingBucketError, UberBucket};

/// A [StorageBackend] able to hold serialized buckets.
pub trait BucketBackend: StorageBackend<Key = Vec<u8>, Value = Vec<u8>> + 'static {}

impl<T> BucketBackend for T where T: StorageBackend<Key = Vec<u8>, Value = Vec<u8>> + 'static {}

/// Reads and writes buckets through a [BucketBackend], using a
/// [NodeFactory] to rebuild node records.
pub struct BucketStore<Factory, Backend> {
    factory: Arc<Factory>,
    backend: Backend,
}

impl<Factory, Backend> Clone for BucketStore<Factory, Backend>
where
    Backend: Clone,
{
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            backend: self.backend.clone(),
        }
    }
}

impl<Factory, Backend> BucketStore<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    /// Pair a factory with a backend
    pub fn new(factory: Factory, backend: Backend) -> Self {
        Self {
            factory: Arc::new(factory),
            backend,
        }
    }

    /// The node factory
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Read the bucket stored under `key`
    pub async fn read_bucket(
        &self,
        key: BucketKey,
    ) -> Result<Option<Bucket<Factory::Node>>, SaplingBucketError> {
        let bytes = self
            .backend
            .get(&key.to_bytes())
            .await
            .map_err(Into::<SaplingStorageError>::into)?;

        bytes
            .map(|bytes| Bucket::decode(&bytes, self.factory.as_ref()))
            .transpose()
    }

    /// Whether anything is stored under `key`
    pub async fn contains_bucket(&self, key: BucketKey) -> Result<bool, SaplingBucketError> {
        let bytes = self
            .backend
            .get(&key.to_bytes())
            .await
            .map_err(Into::<SaplingStorageError>::into)?;
        Ok(bytes.is_some())
    }

    /// First key at or after `from` with nothing stored under it. Commits
    /// allocate keys in sequence, so buckets left by a failed commit form a
    /// contiguous run starting at the published `next_bucket_key`.
    pub async fn first_unused_key(&self, from: u64) -> Result<u64, SaplingBucketError> {
        let mut key = from;
        while key < BucketKey::UBER.0 && self.contains_bucket(BucketKey(key)).await? {
            key += 1;
        }
        Ok(key)
    }

    /// Read the current [UberBucket], `None` for an empty store
    pub async fn read_uber(&self) -> Result<Option<UberBucket>, SaplingBucketError> {
        match self.read_bucket(BucketKey::UBER).await? {
            Some(bucket) => Ok(Some(bucket.as_uber()?.clone())),
            None => Ok(None),
        }
    }

    /// Write `bucket` under `key`
    pub async fn write_bucket(
        &self,
        key: BucketKey,
        bucket: &Bucket<Factory::Node>,
    ) -> Result<(), SaplingBucketError> {
        let bytes = bucket.encode()?;
        tracing::debug!(%key, kind = ?bucket.kind(), size = bytes.len(), "Writing bucket");

        let mut backend = self.backend.clone();
        backend
            .set(key.to_bytes(), bytes)
            .await
            .map_err(Into::<SaplingStorageError>::into)?;
        Ok(())
    }

    /// Replace the current [UberBucket]
    pub async fn write_uber(&self, uber: &UberBucket) -> Result<(), SaplingBucketError> {
        self.write_bucket(BucketKey::UBER, &Bucket::Uber(uber.clone()))
            .await
    }

    /// Close the backend
    pub async fn close(&self) -> Result<(), SaplingBucketError> {
        let mut backend = self.backend.clone();
        backend
            .close()
            .await
            .map_err(Into::<SaplingStorageError>::into)?;
        Ok(())
    }
}

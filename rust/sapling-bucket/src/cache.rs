use std::sync::Arc;

use sieve_cache::ShardedSieveCache;

use crate::{Bucket, BucketKey, SaplingBucketError};

/// Shared cache of committed buckets.
///
/// Only committed buckets are ever put here, and committed buckets never
/// change, so an evicted entry is simply fetched again from the backend.
pub trait BucketCache<Node>: Send + Sync {
    /// Cached bucket stored under `key`
    fn get(&self, key: BucketKey) -> Option<Arc<Bucket<Node>>>;

    /// Remember `bucket` under `key`
    fn put(&self, key: BucketKey, bucket: Arc<Bucket<Node>>);

    /// Forget every entry
    fn clear(&self);
}

/// A bounded [BucketCache] with SIEVE eviction.
pub struct SieveBucketCache<Node>
where
    Node: Send + Sync + 'static,
{
    cache: ShardedSieveCache<BucketKey, Arc<Bucket<Node>>>,
}

impl<Node> SieveBucketCache<Node>
where
    Node: Send + Sync + 'static,
{
    /// A cache holding at most `capacity` buckets
    pub fn new(capacity: usize) -> Result<Self, SaplingBucketError> {
        let cache = ShardedSieveCache::new(capacity).map_err(|error| {
            SaplingBucketError::Configuration(format!("Could not initialize cache: {error}"))
        })?;
        Ok(Self { cache })
    }

    /// Number of cached buckets
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.len() == 0
    }
}

impl<Node> BucketCache<Node> for SieveBucketCache<Node>
where
    Node: Send + Sync + 'static,
{
    fn get(&self, key: BucketKey) -> Option<Arc<Bucket<Node>>> {
        self.cache.get(&key)
    }

    fn put(&self, key: BucketKey, bucket: Arc<Bucket<Node>>) {
        self.cache.insert(key, bucket);
    }

    fn clear(&self) {
        self.cache.clear();
    }
}

/// A [BucketCache] that never holds anything, for measuring uncached cost.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBucketCache;

impl<Node> BucketCache<Node> for NullBucketCache {
    fn get(&self, _key: BucketKey) -> Option<Arc<Bucket<Node>>> {
        None
    }

    fn put(&self, _key: BucketKey, _bucket: Arc<Bucket<Node>>) {}

    fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use sapling_node::BlockNode;

    use crate::{Bucket, BucketCache, BucketKey, MetaBucket, NullBucketCache, SieveBucketCache};

    fn meta() -> Arc<Bucket<BlockNode>> {
        Arc::new(Bucket::Meta(MetaBucket::default()))
    }

    #[test]
    fn it_evicts_beyond_capacity() -> Result<()> {
        let cache = SieveBucketCache::<BlockNode>::new(256)?;

        for key in 0..1024 {
            cache.put(BucketKey(key), meta());
        }

        assert!(cache.len() <= 256);
        assert!(cache.get(BucketKey(1023)).is_some());

        cache.clear();
        assert!(cache.is_empty());

        Ok(())
    }

    #[test]
    fn it_never_hits_the_null_cache() {
        let cache = NullBucketCache;
        BucketCache::<BlockNode>::put(&cache, BucketKey(1), meta());

        assert!(BucketCache::<BlockNode>::get(&cache, BucketKey(1)).is_none());
    }

    #[test]
    fn it_refuses_a_zero_capacity() {
        assert!(SieveBucketCache::<BlockNode>::new(0).is_err());
    }
}

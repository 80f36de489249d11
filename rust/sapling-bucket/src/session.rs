use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use sapling_node::{NodeFactory, NodeKey, NodeRecord};
use sapling_storage::{FileSystemStorageBackend, TransformedStorageBackend};

use crate::{
    Bucket, BucketBackend, BucketCache, BucketKey, BucketReadTransaction, BucketStore,
    BucketWriteTransaction, Radix, ResourceConfig, RevisionRootBucket, SaplingBucketError,
    UberBucket,
};

/// Backend of a resource opened with [Session::open_directory].
pub type DirectoryBackend = TransformedStorageBackend<FileSystemStorageBackend<Vec<u8>, Vec<u8>>>;

pub(crate) struct SessionInner<Factory, Backend>
where
    Factory: NodeFactory,
{
    store: BucketStore<Factory, Backend>,
    config: ResourceConfig,
    node_radix: Radix,
    revision_radix: Radix,
    cache: Arc<dyn BucketCache<Factory::Node>>,
    uber: RwLock<Arc<UberBucket>>,
    writer_active: AtomicBool,
    readers: AtomicUsize,
    closed: AtomicBool,
    next_bucket_key: AtomicU64,
    next_node_key: AtomicU64,
}

/// Owner of an open resource.
///
/// A session hands out any number of [BucketReadTransaction]s, each bound to
/// one committed revision, and at most one [BucketWriteTransaction] at a
/// time. Clones share the same state.
pub struct Session<Factory, Backend>
where
    Factory: NodeFactory,
{
    inner: Arc<SessionInner<Factory, Backend>>,
}

impl<Factory, Backend> Clone for Session<Factory, Backend>
where
    Factory: NodeFactory,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Factory> Session<Factory, DirectoryBackend>
where
    Factory: NodeFactory,
{
    /// Open the resource stored in `directory`, creating it with `config` if
    /// the directory holds no resource yet. An existing resource keeps the
    /// configuration it was created with.
    pub async fn open_directory<P: AsRef<Path>>(
        directory: P,
        factory: Factory,
        config: ResourceConfig,
    ) -> Result<Self, SaplingBucketError> {
        let directory = directory.as_ref();
        let config = match ResourceConfig::load(directory).await? {
            Some(existing) => existing,
            None => {
                config.validate()?;
                config.store(directory).await?;
                config
            }
        };

        let files = FileSystemStorageBackend::new(ResourceConfig::data_dir(directory)).await?;
        let backend = TransformedStorageBackend::new(files, config.pipeline()?);

        Self::open(factory, backend, config).await
    }
}

impl<Factory, Backend> Session<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    /// Open the resource held by `backend`. An empty backend is bootstrapped
    /// with revision 0.
    #[tracing::instrument(skip_all, fields(factory = factory.id()))]
    pub async fn open(
        factory: Factory,
        backend: Backend,
        config: ResourceConfig,
    ) -> Result<Self, SaplingBucketError> {
        config.validate()?;
        if config.node_factory != factory.id() {
            return Err(SaplingBucketError::Configuration(format!(
                "Resource was created for node factory '{}', not '{}'",
                config.node_factory,
                factory.id()
            )));
        }

        let store = BucketStore::new(factory, backend);
        let uber = store.read_uber().await?;
        let bootstrap = uber.is_none();
        let uber = uber.unwrap_or_default();
        let next_bucket_key = store.first_unused_key(uber.next_bucket_key).await?;
        if next_bucket_key != uber.next_bucket_key {
            tracing::warn!(
                orphaned = next_bucket_key - uber.next_bucket_key,
                "Skipping buckets left by an unpublished commit"
            );
        }

        let session = Session {
            inner: Arc::new(SessionInner {
                node_radix: config.node_radix()?,
                revision_radix: config.revision_radix()?,
                cache: config.cache()?,
                next_bucket_key: AtomicU64::new(next_bucket_key),
                uber: RwLock::new(Arc::new(uber)),
                writer_active: AtomicBool::new(false),
                readers: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                next_node_key: AtomicU64::new(0),
                store,
                config,
            }),
        };

        if bootstrap {
            session.bootstrap().await?;
        } else {
            let root = session.latest_root().await?;
            let next = root.max_node_key.map_or(0, |key| key + 1);
            session.inner.next_node_key.store(next, Ordering::SeqCst);
        }

        tracing::debug!(revision = session.latest_revision(), "Opened resource");
        Ok(session)
    }

    async fn bootstrap(&self) -> Result<(), SaplingBucketError> {
        let mut writer = self.begin_write_transaction().await?;
        if let Some(root) = self.inner.store.factory().bootstrap() {
            let key = writer.allocate_node_key()?;
            if key != root.key() {
                return Err(SaplingBucketError::Configuration(format!(
                    "Bootstrap record expects key {}, allocated {key}",
                    root.key()
                )));
            }
            writer.insert(root).await?;
        }
        let revision = writer.commit().await?;
        tracing::info!(revision, "Bootstrapped empty resource");
        Ok(())
    }

    /// The configuration this resource was opened with
    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    /// The node factory of this resource
    pub fn factory(&self) -> &Factory {
        self.inner.store.factory()
    }

    /// Latest committed revision
    pub fn latest_revision(&self) -> u64 {
        self.current_uber().latest_revision().unwrap_or_default()
    }

    /// Number of read transactions not yet closed
    pub fn active_readers(&self) -> usize {
        self.inner.readers.load(Ordering::SeqCst)
    }

    /// Whether a write transaction is active
    pub fn has_active_writer(&self) -> bool {
        self.inner.writer_active.load(Ordering::SeqCst)
    }

    /// Whether [Session::close] was called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Begin a read transaction bound to `revision`
    pub async fn begin_read_transaction(
        &self,
        revision: u64,
    ) -> Result<BucketReadTransaction<Factory, Backend>, SaplingBucketError> {
        self.ensure_open()?;
        let uber = self.current_uber();
        if revision >= uber.revision_count {
            return Err(SaplingBucketError::InvalidRevision {
                requested: revision,
                latest: uber.latest_revision(),
            });
        }
        let root = self.revision_root(&uber, revision).await?;

        self.inner.readers.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(revision, "Began read transaction");
        BucketReadTransaction::new(self.clone(), uber, root)
    }

    /// Begin a read transaction bound to the latest revision
    pub async fn begin_latest_read_transaction(
        &self,
    ) -> Result<BucketReadTransaction<Factory, Backend>, SaplingBucketError> {
        self.begin_read_transaction(self.latest_revision()).await
    }

    /// Begin the single write transaction of this session
    pub async fn begin_write_transaction(
        &self,
    ) -> Result<BucketWriteTransaction<Factory, Backend>, SaplingBucketError> {
        self.ensure_open()?;
        if self
            .inner
            .writer_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SaplingBucketError::ConcurrentWriteViolation);
        }

        let uber = self.current_uber();
        let base_root = match uber.latest_root {
            Some(_) => match self.latest_root().await {
                Ok(root) => Some(root),
                Err(error) => {
                    self.release_writer();
                    return Err(error);
                }
            },
            None => None,
        };

        tracing::debug!(revision = uber.revision_count, "Began write transaction");
        Ok(BucketWriteTransaction::new(self.clone(), uber, base_root))
    }

    /// Close the session and its backend. Live transactions fail from now
    /// on. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), SaplingBucketError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.cache.clear();
        self.inner.store.close().await?;
        tracing::debug!("Closed session");
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SaplingBucketError> {
        if self.is_closed() {
            return Err(SaplingBucketError::SessionClosed);
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &BucketStore<Factory, Backend> {
        &self.inner.store
    }

    pub(crate) fn node_radix(&self) -> &Radix {
        &self.inner.node_radix
    }

    pub(crate) fn current_uber(&self) -> Arc<UberBucket> {
        self.inner.uber.read().clone()
    }

    /// Fetch a committed bucket, consulting the shared cache first.
    pub(crate) async fn fetch_bucket(
        &self,
        key: BucketKey,
    ) -> Result<Arc<Bucket<Factory::Node>>, SaplingBucketError> {
        self.ensure_open()?;
        if let Some(bucket) = self.inner.cache.get(key) {
            return Ok(bucket);
        }

        tracing::debug!(%key, "Bucket cache miss");
        let bucket = self
            .inner
            .store
            .read_bucket(key)
            .await?
            .ok_or(SaplingBucketError::MissingBucket(key))?;
        let bucket = Arc::new(bucket);
        self.inner.cache.put(key, bucket.clone());
        Ok(bucket)
    }

    async fn latest_root(&self) -> Result<RevisionRootBucket, SaplingBucketError> {
        let uber = self.current_uber();
        let key = uber.latest_root.ok_or_else(|| {
            SaplingBucketError::CorruptFormat("Uber bucket names no revision".into())
        })?;
        Ok(self.fetch_bucket(key).await?.as_revision_root()?.clone())
    }

    /// Resolve the root of `revision` through the revision tree of `uber`.
    async fn revision_root(
        &self,
        uber: &UberBucket,
        revision: u64,
    ) -> Result<RevisionRootBucket, SaplingBucketError> {
        let key = if Some(revision) == uber.latest_revision() {
            uber.latest_root
        } else {
            let radix = &self.inner.revision_radix;
            let mut reference = uber.revision_tree;
            for level in 0..radix.levels() {
                reference = match reference {
                    Some(key) => self
                        .fetch_bucket(key)
                        .await?
                        .as_indirect()?
                        .get(radix.offset(revision, level)),
                    None => break,
                };
            }
            reference
        };

        let key = key.ok_or_else(|| {
            SaplingBucketError::CorruptFormat(format!("Revision {revision} is not in the revision tree"))
        })?;
        let root = self.fetch_bucket(key).await?.as_revision_root()?.clone();
        if root.revision != revision {
            return Err(SaplingBucketError::CorruptFormat(format!(
                "Revision tree maps {revision} to the root of revision {}",
                root.revision
            )));
        }
        Ok(root)
    }

    pub(crate) fn revision_radix(&self) -> &Radix {
        &self.inner.revision_radix
    }

    pub(crate) fn allocate_bucket_key(&self) -> BucketKey {
        BucketKey(self.inner.next_bucket_key.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn peek_next_bucket_key(&self) -> u64 {
        self.inner.next_bucket_key.load(Ordering::SeqCst)
    }

    pub(crate) fn allocate_node_key(&self) -> NodeKey {
        self.inner.next_node_key.fetch_add(1, Ordering::SeqCst)
    }

    /// Swap in a durably written uber bucket and remember what was written.
    pub(crate) fn publish(
        &self,
        uber: UberBucket,
        written: Vec<(BucketKey, Bucket<Factory::Node>)>,
    ) {
        *self.inner.uber.write() = Arc::new(uber);
        for (key, bucket) in written {
            self.inner.cache.put(key, Arc::new(bucket));
        }
    }

    pub(crate) fn release_writer(&self) {
        self.inner.writer_active.store(false, Ordering::SeqCst);
    }

    pub(crate) fn release_reader(&self) {
        self.inner.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

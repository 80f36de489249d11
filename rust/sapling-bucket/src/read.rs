use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use sapling_node::{NodeFactory, NodeKey};
use sieve_cache::SieveCache;

use crate::{
    Bucket, BucketBackend, BucketKey, RevisionRootBucket, SaplingBucketError, Session, UberBucket,
};

const MEMO_CAPACITY: usize = 64;
const NAME_PREFIX: &[u8] = b"sapling.name.";

/// Buckets a single read transaction has already resolved.
pub(crate) type BucketMemo<Node> = Mutex<SieveCache<BucketKey, Arc<Bucket<Node>>>>;

/// Meta key under which the name interned as `key` is stored.
pub(crate) fn name_meta_key(key: i32) -> Vec<u8> {
    let mut meta_key = NAME_PREFIX.to_vec();
    meta_key.extend_from_slice(&key.to_be_bytes());
    meta_key
}

pub(crate) fn decode_name(bytes: Vec<u8>) -> Result<String, SaplingBucketError> {
    String::from_utf8(bytes)
        .map_err(|error| SaplingBucketError::CorruptFormat(format!("Interned name: {error}")))
}

async fn fetch<Factory, Backend>(
    session: &Session<Factory, Backend>,
    memo: Option<&BucketMemo<Factory::Node>>,
    key: BucketKey,
) -> Result<Arc<Bucket<Factory::Node>>, SaplingBucketError>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    if let Some(bucket) = memo.and_then(|memo| memo.lock().get(&key).cloned()) {
        return Ok(bucket);
    }
    let bucket = session.fetch_bucket(key).await?;
    if let Some(memo) = memo {
        memo.lock().insert(key, bucket.clone());
    }
    Ok(bucket)
}

/// Resolve `key` in the committed node tree of `root`.
pub(crate) async fn resolve_node<Factory, Backend>(
    session: &Session<Factory, Backend>,
    memo: Option<&BucketMemo<Factory::Node>>,
    root: &RevisionRootBucket,
    key: NodeKey,
) -> Result<Option<Factory::Node>, SaplingBucketError>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    if root.max_node_key.is_none_or(|max| key > max) {
        return Ok(None);
    }
    let Some(mut reference) = root.node_tree else {
        return Ok(None);
    };

    let radix = session.node_radix();
    let data_level = radix.levels() - 1;
    for level in 0..data_level {
        let bucket = fetch(session, memo, reference).await?;
        match bucket.as_indirect()?.get(radix.offset(key, level)) {
            Some(next) => reference = next,
            None => return Ok(None),
        }
    }

    let bucket = fetch(session, memo, reference).await?;
    Ok(bucket.as_data()?.get(radix.offset(key, data_level)).cloned())
}

/// Look up `key` in the committed metadata of `root`.
pub(crate) async fn resolve_meta<Factory, Backend>(
    session: &Session<Factory, Backend>,
    memo: Option<&BucketMemo<Factory::Node>>,
    root: &RevisionRootBucket,
    key: &[u8],
) -> Result<Option<Vec<u8>>, SaplingBucketError>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    let Some(reference) = root.meta else {
        return Ok(None);
    };
    let bucket = fetch(session, memo, reference).await?;
    Ok(bucket.as_meta()?.get(key).map(<[u8]>::to_vec))
}

/// A consistent view of one committed revision.
///
/// Reads never observe writes made after the transaction began, committed
/// or not. Dropping the transaction closes it.
pub struct BucketReadTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    session: Session<Factory, Backend>,
    uber: Arc<UberBucket>,
    root: RevisionRootBucket,
    memo: BucketMemo<Factory::Node>,
    closed: AtomicBool,
}

impl<Factory, Backend> BucketReadTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    pub(crate) fn new(
        session: Session<Factory, Backend>,
        uber: Arc<UberBucket>,
        root: RevisionRootBucket,
    ) -> Result<Self, SaplingBucketError> {
        let memo = match SieveCache::new(MEMO_CAPACITY) {
            Ok(memo) => memo,
            Err(error) => {
                session.release_reader();
                return Err(SaplingBucketError::Configuration(format!(
                    "Could not initialize read memo: {error}"
                )));
            }
        };
        Ok(Self {
            session,
            uber,
            root,
            memo: Mutex::new(memo),
            closed: AtomicBool::new(false),
        })
    }

    /// The revision this transaction reads
    pub fn revision(&self) -> u64 {
        self.root.revision
    }

    /// Number of revisions committed when this transaction began
    pub fn revision_count(&self) -> u64 {
        self.uber.revision_count
    }

    /// Commit time of the revision, in milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> u64 {
        self.root.timestamp_millis
    }

    /// Highest node key allocated in this revision
    pub fn max_node_key(&self) -> Option<NodeKey> {
        self.root.max_node_key
    }

    /// Whether [BucketReadTransaction::close] was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), SaplingBucketError> {
        if self.is_closed() {
            return Err(SaplingBucketError::TransactionClosed);
        }
        self.session.ensure_open()
    }

    /// The record stored under `key`, `None` if the key was never written in
    /// this revision. Deleted records come back as tombstones.
    pub async fn get_node(&self, key: NodeKey) -> Result<Option<Factory::Node>, SaplingBucketError> {
        self.ensure_open()?;
        resolve_node(&self.session, Some(&self.memo), &self.root, key).await
    }

    /// Revision metadata stored under `key`
    pub async fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SaplingBucketError> {
        self.ensure_open()?;
        resolve_meta(&self.session, Some(&self.memo), &self.root, key).await
    }

    /// The name interned under `key`
    pub async fn name(&self, key: i32) -> Result<Option<String>, SaplingBucketError> {
        self.get_meta(&name_meta_key(key))
            .await?
            .map(decode_name)
            .transpose()
    }

    /// Release the transaction. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.memo.lock().clear();
        self.session.release_reader();
        tracing::debug!(revision = self.revision(), "Closed read transaction");
    }
}

impl<Factory, Backend> Drop for BucketReadTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    fn drop(&mut self) {
        self.close();
    }
}

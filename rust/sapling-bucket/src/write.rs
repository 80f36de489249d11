use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use sapling_node::{NodeFactory, NodeKey, NodeRecord, name_key, replace_child_hash};

use crate::{
    Bucket, BucketBackend, BucketKey, DataBucket, DirtyBucket, IndirectBucket, LogKey, MetaBucket,
    RevisionRootBucket, SaplingBucketError, Session, TransactionLog, UberBucket,
    read::{decode_name, name_meta_key, resolve_meta, resolve_node},
};

/// Lifecycle of a [BucketWriteTransaction].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes
    Active,
    /// Published as a new revision
    Committed,
    /// Discarded without touching storage
    Aborted,
}

/// The single writer of a session.
///
/// Changes are staged in a private [TransactionLog] of copied buckets and
/// become visible to other transactions only when [commit] publishes a new
/// revision. Dropping an active transaction aborts it.
///
/// [commit]: BucketWriteTransaction::commit
pub struct BucketWriteTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    session: Session<Factory, Backend>,
    base: Arc<UberBucket>,
    base_root: Option<RevisionRootBucket>,
    max_node_key: Option<NodeKey>,
    log: TransactionLog<Factory::Node>,
    meta: Option<MetaBucket>,
    state: TransactionState,
}

impl<Factory, Backend> BucketWriteTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    pub(crate) fn new(
        session: Session<Factory, Backend>,
        base: Arc<UberBucket>,
        base_root: Option<RevisionRootBucket>,
    ) -> Self {
        let max_node_key = base_root.as_ref().and_then(|root| root.max_node_key);
        Self {
            session,
            base,
            base_root,
            max_node_key,
            log: TransactionLog::default(),
            meta: None,
            state: TransactionState::Active,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The revision a successful commit will publish
    pub fn revision(&self) -> u64 {
        self.base.revision_count
    }

    /// Revision this transaction started from, `None` in an empty resource
    pub fn base_revision(&self) -> Option<u64> {
        self.base.latest_revision()
    }

    /// Highest node key allocated so far, in this transaction or before it
    pub fn max_node_key(&self) -> Option<NodeKey> {
        self.max_node_key
    }

    /// Number of node-tree buckets copied or created so far
    pub fn dirty_buckets(&self) -> usize {
        self.log.len()
    }

    fn ensure_active(&self) -> Result<(), SaplingBucketError> {
        if self.state != TransactionState::Active {
            return Err(SaplingBucketError::TransactionClosed);
        }
        self.session.ensure_open()
    }

    /// Reserve a fresh node key. Keys are never handed out twice, even when
    /// this transaction aborts.
    pub fn allocate_node_key(&mut self) -> Result<NodeKey, SaplingBucketError> {
        self.ensure_active()?;
        let key = self.session.allocate_node_key();
        self.max_node_key = Some(self.max_node_key.map_or(key, |max| max.max(key)));
        Ok(key)
    }

    /// The record stored under `key` as this transaction sees it: its own
    /// changes first, the base revision otherwise.
    pub async fn get_node(&self, key: NodeKey) -> Result<Option<Factory::Node>, SaplingBucketError> {
        self.ensure_active()?;
        if self.max_node_key.is_none_or(|max| key > max) {
            return Ok(None);
        }

        let radix = self.session.node_radix();
        let data_level = radix.levels() - 1;
        let position = LogKey {
            level: data_level,
            prefix: radix.prefix(key, data_level),
        };
        if let Some(bucket) = self.log.data(&position) {
            return Ok(bucket.get(radix.offset(key, data_level)).cloned());
        }

        match &self.base_root {
            Some(root) => resolve_node(&self.session, None, root, key).await,
            None => Ok(None),
        }
    }

    /// The private data bucket covering `key`, copying the committed path
    /// into the log on first use.
    async fn dirty_data(
        &mut self,
        key: NodeKey,
    ) -> Result<&mut DataBucket<Factory::Node>, SaplingBucketError> {
        let radix = self.session.node_radix().clone();
        let data_level = radix.levels() - 1;
        let position = LogKey {
            level: data_level,
            prefix: radix.prefix(key, data_level),
        };

        if !self.log.contains(&position) {
            let mut committed = self.base_root.as_ref().and_then(|root| root.node_tree);
            for level in 0..=data_level {
                let log_key = LogKey {
                    level,
                    prefix: radix.prefix(key, level),
                };
                let existing = match committed {
                    Some(reference) => Some(self.session.fetch_bucket(reference).await?),
                    None => None,
                };
                if level < data_level {
                    committed = match &existing {
                        Some(bucket) => bucket.as_indirect()?.get(radix.offset(key, level)),
                        None => None,
                    };
                }
                if self.log.contains(&log_key) {
                    continue;
                }

                let copy = match (level == data_level, existing) {
                    (false, Some(bucket)) => DirtyBucket::Indirect(bucket.as_indirect()?.clone()),
                    (false, None) => DirtyBucket::Indirect(IndirectBucket::new(radix.fan_out(level))),
                    (true, Some(bucket)) => DirtyBucket::Data(bucket.as_data()?.clone()),
                    (true, None) => DirtyBucket::Data(DataBucket::new(
                        radix.first_key(log_key.prefix, level),
                        radix.fan_out(level),
                    )),
                };
                self.log.insert(log_key, copy);
            }
        }

        self.log.data_mut(&position).ok_or_else(|| {
            SaplingBucketError::CorruptFormat(format!("No data bucket staged for node {key}"))
        })
    }

    async fn put_node(&mut self, node: Factory::Node) -> Result<(), SaplingBucketError> {
        let radix = self.session.node_radix();
        let slot = radix.offset(node.key(), radix.levels() - 1);
        self.dirty_data(node.key()).await?.set(slot, node)
    }

    async fn live_node(&self, key: NodeKey) -> Result<Factory::Node, SaplingBucketError> {
        match self.get_node(key).await? {
            Some(node) if !node.is_tombstone() => Ok(node),
            _ => Err(SaplingBucketError::InvalidOperation(format!(
                "No live record under key {key}"
            ))),
        }
    }

    /// Fold a child hash change into every ancestor, starting at `parent`.
    async fn propagate(
        &mut self,
        mut parent: NodeKey,
        mut old_child: u64,
        mut new_child: u64,
    ) -> Result<(), SaplingBucketError> {
        loop {
            let mut node = self.get_node(parent).await?.ok_or_else(|| {
                SaplingBucketError::CorruptFormat(format!("Ancestor {parent} is missing"))
            })?;
            let old_hash = node.hash();
            let new_hash = replace_child_hash(old_hash, old_child, new_child);
            if old_hash == new_hash {
                return Ok(());
            }

            node.set_hash(new_hash);
            let grandparent = node.parent_key();
            self.put_node(node).await?;

            match grandparent {
                Some(key) => {
                    parent = key;
                    old_child = old_hash;
                    new_child = new_hash;
                }
                None => return Ok(()),
            }
        }
    }

    /// Store a new record under its (already allocated, still empty) key.
    /// Returns the record with its hash set.
    pub async fn insert(
        &mut self,
        mut node: Factory::Node,
    ) -> Result<Factory::Node, SaplingBucketError> {
        self.ensure_active()?;
        let key = node.key();
        if self.max_node_key.is_none_or(|max| key > max) {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node key {key} was never allocated"
            )));
        }
        if node.is_tombstone() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Cannot insert a tombstone under key {key}"
            )));
        }
        if self.get_node(key).await?.is_some() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node key {key} is already occupied"
            )));
        }
        if let Some(parent) = node.parent_key() {
            self.live_node(parent).await?;
        }

        let hash = node.content_hash();
        node.set_hash(hash);
        self.put_node(node.clone()).await?;
        if let Some(parent) = node.parent_key() {
            self.propagate(parent, 0, hash).await?;
        }
        Ok(node)
    }

    /// Replace a live record in place. The parent may not change. Returns
    /// the record with its hash set.
    pub async fn update(
        &mut self,
        mut node: Factory::Node,
    ) -> Result<Factory::Node, SaplingBucketError> {
        self.ensure_active()?;
        let key = node.key();
        let existing = self.live_node(key).await?;
        if node.is_tombstone() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Use remove to delete key {key}"
            )));
        }
        if node.parent_key() != existing.parent_key() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node {key} cannot change its parent"
            )));
        }

        let old_hash = existing.hash();
        let new_hash = old_hash
            .wrapping_sub(existing.content_hash())
            .wrapping_add(node.content_hash());
        node.set_hash(new_hash);
        self.put_node(node.clone()).await?;
        if let (Some(parent), true) = (node.parent_key(), old_hash != new_hash) {
            self.propagate(parent, old_hash, new_hash).await?;
        }
        Ok(node)
    }

    /// Replace the record under `key` with a tombstone. Records that still
    /// have children, and the bootstrap record, cannot be removed.
    pub async fn remove(&mut self, key: NodeKey) -> Result<Factory::Node, SaplingBucketError> {
        self.ensure_active()?;
        let existing = self.live_node(key).await?;
        if existing.has_children() {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node {key} still has children"
            )));
        }
        let factory = self.session.factory();
        if factory.bootstrap().is_some_and(|root| root.key() == key) {
            return Err(SaplingBucketError::InvalidOperation(format!(
                "Node {key} is the resource root"
            )));
        }

        let mut tombstone = factory.tombstone(&existing);
        tombstone.set_hash(0);
        self.put_node(tombstone.clone()).await?;
        if let Some(parent) = existing.parent_key() {
            self.propagate(parent, existing.hash(), 0).await?;
        }
        Ok(tombstone)
    }

    /// Revision metadata stored under `key`, including this transaction's
    /// own writes
    pub async fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SaplingBucketError> {
        self.ensure_active()?;
        if let Some(meta) = &self.meta {
            return Ok(meta.get(key).map(<[u8]>::to_vec));
        }
        match &self.base_root {
            Some(root) => resolve_meta(&self.session, None, root, key).await,
            None => Ok(None),
        }
    }

    /// Store revision metadata
    pub async fn set_meta(
        &mut self,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), SaplingBucketError> {
        self.ensure_active()?;
        if self.meta.is_none() {
            let committed = match self.base_root.as_ref().and_then(|root| root.meta) {
                Some(reference) => self.session.fetch_bucket(reference).await?.as_meta()?.clone(),
                None => MetaBucket::default(),
            };
            self.meta = Some(committed);
        }
        if let Some(meta) = &mut self.meta {
            meta.insert(key, value);
        }
        Ok(())
    }

    /// Intern `name` and return its key. Interning the same name twice
    /// returns the same key.
    pub async fn create_name_key(&mut self, name: &str) -> Result<i32, SaplingBucketError> {
        let key = name_key(name);
        let meta_key = name_meta_key(key);
        match self.get_meta(&meta_key).await? {
            Some(existing) if existing == name.as_bytes() => Ok(key),
            Some(existing) => Err(SaplingBucketError::InvalidOperation(format!(
                "Name '{name}' collides with '{}'",
                String::from_utf8_lossy(&existing)
            ))),
            None => {
                self.set_meta(meta_key, name.as_bytes().to_vec()).await?;
                Ok(key)
            }
        }
    }

    /// The name interned under `key`
    pub async fn name(&self, key: i32) -> Result<Option<String>, SaplingBucketError> {
        self.get_meta(&name_meta_key(key))
            .await?
            .map(decode_name)
            .transpose()
    }

    /// Durably publish every change as a new revision and return its
    /// number. On failure nothing is published and the transaction is
    /// aborted.
    #[tracing::instrument(skip_all, fields(revision = self.base.revision_count))]
    pub async fn commit(&mut self) -> Result<u64, SaplingBucketError> {
        self.ensure_active()?;
        let dirty = self.log.len();
        let result = self.write_revision().await;

        self.log.clear();
        self.meta = None;
        self.session.release_writer();

        match result {
            Ok(revision) => {
                self.state = TransactionState::Committed;
                tracing::info!(revision, dirty, "Committed revision");
                Ok(revision)
            }
            Err(error) => {
                self.state = TransactionState::Aborted;
                tracing::warn!(%error, "Commit failed, transaction aborted");
                Err(error)
            }
        }
    }

    async fn write_revision(&mut self) -> Result<u64, SaplingBucketError> {
        let revision = self.base.revision_count;
        let radix = self.session.node_radix().clone();
        let store = self.session.store().clone();
        let mut written: Vec<(BucketKey, Bucket<Factory::Node>)> = Vec::new();

        let mut node_tree = self.base_root.as_ref().and_then(|root| root.node_tree);
        for position in self.log.keys_bottom_up() {
            let bucket = match self.log.remove(&position) {
                Some(DirtyBucket::Indirect(bucket)) => Bucket::Indirect(bucket),
                Some(DirtyBucket::Data(bucket)) => Bucket::Data(bucket),
                None => continue,
            };
            let key = self.session.allocate_bucket_key();
            store.write_bucket(key, &bucket).await?;
            written.push((key, bucket));

            if position.level == 0 {
                node_tree = Some(key);
                continue;
            }
            let (prefix, slot) = radix.parent_of(position.prefix, position.level);
            let parent = LogKey {
                level: position.level - 1,
                prefix,
            };
            self.log
                .indirect_mut(&parent)
                .ok_or_else(|| {
                    SaplingBucketError::CorruptFormat(format!(
                        "Dirty bucket at {position:?} has no dirty parent"
                    ))
                })?
                .set(slot, key)?;
        }

        let mut meta = self.base_root.as_ref().and_then(|root| root.meta);
        if let Some(bucket) = self.meta.take() {
            let key = self.session.allocate_bucket_key();
            let bucket = Bucket::Meta(bucket);
            store.write_bucket(key, &bucket).await?;
            written.push((key, bucket));
            meta = Some(key);
        }

        let root = Bucket::RevisionRoot(RevisionRootBucket {
            revision,
            max_node_key: self.max_node_key,
            node_tree,
            meta,
            timestamp_millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or_default(),
        });
        let root_key = self.session.allocate_bucket_key();
        store.write_bucket(root_key, &root).await?;
        written.push((root_key, root));

        let revision_tree = self.write_revision_path(revision, root_key, &mut written).await?;

        let uber = UberBucket {
            revision_count: revision + 1,
            latest_root: Some(root_key),
            revision_tree: Some(revision_tree),
            next_bucket_key: self.session.peek_next_bucket_key(),
        };
        store.write_uber(&uber).await?;
        self.session.publish(uber, written);
        Ok(revision)
    }

    /// Copy the revision-tree path of `revision`, pointing its last slot at
    /// `root_key`. Returns the key of the new top bucket.
    async fn write_revision_path(
        &self,
        revision: u64,
        root_key: BucketKey,
        written: &mut Vec<(BucketKey, Bucket<Factory::Node>)>,
    ) -> Result<BucketKey, SaplingBucketError> {
        let radix = self.session.revision_radix();
        let store = self.session.store();

        let mut path = Vec::with_capacity(radix.levels());
        let mut committed = self.base.revision_tree;
        for level in 0..radix.levels() {
            let bucket = match committed {
                Some(reference) => self.session.fetch_bucket(reference).await?.as_indirect()?.clone(),
                None => IndirectBucket::new(radix.fan_out(level)),
            };
            committed = bucket.get(radix.offset(revision, level));
            path.push(bucket);
        }

        let mut child = root_key;
        for (level, mut bucket) in path.into_iter().enumerate().rev() {
            bucket.set(radix.offset(revision, level), child)?;
            let key = self.session.allocate_bucket_key();
            let bucket = Bucket::Indirect(bucket);
            store.write_bucket(key, &bucket).await?;
            written.push((key, bucket));
            child = key;
        }
        Ok(child)
    }

    /// Discard every change. Storage is not touched.
    pub fn abort(&mut self) -> Result<(), SaplingBucketError> {
        if self.state != TransactionState::Active {
            return Err(SaplingBucketError::TransactionClosed);
        }
        self.log.clear();
        self.meta = None;
        self.state = TransactionState::Aborted;
        self.session.release_writer();
        tracing::debug!(revision = self.revision(), "Aborted write transaction");
        Ok(())
    }
}

impl<Factory, Backend> Drop for BucketWriteTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            tracing::warn!(
                revision = self.revision(),
                "Write transaction dropped while active, aborting"
            );
            self.state = TransactionState::Aborted;
            self.session.release_writer();
        }
    }
}

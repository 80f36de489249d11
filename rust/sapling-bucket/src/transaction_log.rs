use std::collections::HashMap;

use sapling_node::NodeRecord;

use crate::{DataBucket, IndirectBucket};

/// Position of a bucket in the node tree: its level and the key bits above
/// that level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    /// Depth below the revision root, 0 being the top indirect bucket
    pub level: usize,
    /// Key bits above `level`
    pub prefix: u64,
}

/// A bucket cloned into a write transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum DirtyBucket<Node> {
    /// A private copy of an indirect bucket
    Indirect(IndirectBucket),
    /// A private copy of a data bucket
    Data(DataBucket<Node>),
}

/// The dirty set of a write transaction: every node-tree bucket it has
/// copied or created, by tree position. Nothing in here is visible outside
/// the owning transaction.
#[derive(Debug)]
pub struct TransactionLog<Node> {
    buckets: HashMap<LogKey, DirtyBucket<Node>>,
}

impl<Node> Default for TransactionLog<Node> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }
}

impl<Node> TransactionLog<Node>
where
    Node: NodeRecord,
{
    /// Whether a bucket at `key` was copied
    pub fn contains(&self, key: &LogKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// The dirty data bucket at `key`
    pub fn data(&self, key: &LogKey) -> Option<&DataBucket<Node>> {
        match self.buckets.get(key) {
            Some(DirtyBucket::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// The dirty data bucket at `key`, mutably
    pub fn data_mut(&mut self, key: &LogKey) -> Option<&mut DataBucket<Node>> {
        match self.buckets.get_mut(key) {
            Some(DirtyBucket::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// The dirty indirect bucket at `key`, mutably
    pub fn indirect_mut(&mut self, key: &LogKey) -> Option<&mut IndirectBucket> {
        match self.buckets.get_mut(key) {
            Some(DirtyBucket::Indirect(indirect)) => Some(indirect),
            _ => None,
        }
    }

    /// Record a copied or created bucket
    pub fn insert(&mut self, key: LogKey, bucket: DirtyBucket<Node>) {
        self.buckets.insert(key, bucket);
    }

    /// Take a bucket out of the log
    pub fn remove(&mut self, key: &LogKey) -> Option<DirtyBucket<Node>> {
        self.buckets.remove(key)
    }

    /// Positions of every dirty bucket, deepest level first
    pub fn keys_bottom_up(&self) -> Vec<LogKey> {
        let mut keys: Vec<LogKey> = self.buckets.keys().copied().collect();
        keys.sort_by(|left, right| right.level.cmp(&left.level).then(left.prefix.cmp(&right.prefix)));
        keys
    }

    /// Number of dirty buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether nothing was modified
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every dirty bucket
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

use async_trait::async_trait;
use sapling_node::{NodeFactory, NodeKey, NodeRecord, ROOT_NODE_KEY};

use crate::{BucketBackend, BucketReadTransaction, BucketWriteTransaction, SaplingBucketError};

/// Anything that resolves node keys to records: the narrow read interface
/// query, diff and serialization code is written against.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// The record family served
    type Node: NodeRecord;

    /// The record stored under `key`, if any
    async fn get_node(&self, key: NodeKey) -> Result<Option<Self::Node>, SaplingBucketError>;
}

#[async_trait]
impl<Factory, Backend> NodeSource for BucketReadTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    type Node = Factory::Node;

    async fn get_node(&self, key: NodeKey) -> Result<Option<Self::Node>, SaplingBucketError> {
        BucketReadTransaction::get_node(self, key).await
    }
}

#[async_trait]
impl<Factory, Backend> NodeSource for BucketWriteTransaction<Factory, Backend>
where
    Factory: NodeFactory,
    Backend: BucketBackend,
{
    type Node = Factory::Node;

    async fn get_node(&self, key: NodeKey) -> Result<Option<Self::Node>, SaplingBucketError> {
        BucketWriteTransaction::get_node(self, key).await
    }
}

/// Read-only navigation over the records of a [NodeSource].
///
/// Failed moves (to a missing key or a tombstone) leave the cursor where it
/// was.
pub struct NodeCursor<'a, Source>
where
    Source: NodeSource,
{
    source: &'a Source,
    current: Option<Source::Node>,
}

impl<'a, Source> NodeCursor<'a, Source>
where
    Source: NodeSource,
{
    /// A cursor not yet positioned on any record
    pub fn new(source: &'a Source) -> Self {
        Self {
            source,
            current: None,
        }
    }

    /// The record under the cursor
    pub fn current_node(&self) -> Option<&Source::Node> {
        self.current.as_ref()
    }

    /// Key of the record under the cursor
    pub fn current_key(&self) -> Option<NodeKey> {
        self.current.as_ref().map(NodeRecord::key)
    }

    /// Move onto the live record stored under `key`
    pub async fn move_to(&mut self, key: NodeKey) -> Result<bool, SaplingBucketError> {
        match self.source.get_node(key).await? {
            Some(node) if !node.is_tombstone() => {
                self.current = Some(node);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn follow(
        &mut self,
        link: impl FnOnce(&Source::Node) -> Option<NodeKey>,
    ) -> Result<bool, SaplingBucketError> {
        match self.current.as_ref().and_then(link) {
            Some(key) => self.move_to(key).await,
            None => Ok(false),
        }
    }

    /// Move onto the document root
    pub async fn move_to_document_root(&mut self) -> Result<bool, SaplingBucketError> {
        self.move_to(ROOT_NODE_KEY).await
    }

    /// Move onto the parent of the current record
    pub async fn move_to_parent(&mut self) -> Result<bool, SaplingBucketError> {
        self.follow(NodeRecord::parent_key).await
    }

    /// Move onto the first child of the current record
    pub async fn move_to_first_child(&mut self) -> Result<bool, SaplingBucketError> {
        self.follow(NodeRecord::first_child_key).await
    }

    /// Move onto the preceding sibling of the current record
    pub async fn move_to_left_sibling(&mut self) -> Result<bool, SaplingBucketError> {
        self.follow(NodeRecord::left_sibling_key).await
    }

    /// Move onto the following sibling of the current record
    pub async fn move_to_right_sibling(&mut self) -> Result<bool, SaplingBucketError> {
        self.follow(NodeRecord::right_sibling_key).await
    }

    async fn live(&self, key: NodeKey) -> Result<Source::Node, SaplingBucketError> {
        match self.source.get_node(key).await? {
            Some(node) if !node.is_tombstone() => Ok(node),
            _ => Err(SaplingBucketError::CorruptFormat(format!(
                "Structural link points at missing node {key}"
            ))),
        }
    }

    /// Keys of the structural subtree under the cursor in pre-order, the
    /// current record first. Empty when the cursor is not positioned. A
    /// sibling chain longer than its parent's child count is corrupt.
    pub async fn descendant_keys(&self) -> Result<Vec<NodeKey>, SaplingBucketError> {
        let mut keys = Vec::new();
        let mut pending = Vec::new();
        if let Some(key) = self.current_key() {
            pending.push(self.live(key).await?);
        }

        while let Some(node) = pending.pop() {
            keys.push(node.key());

            let expected = node.child_count() as usize;
            let mut children = Vec::with_capacity(expected);
            let mut next = node.first_child_key();
            while let Some(key) = next {
                if children.len() == expected {
                    return Err(SaplingBucketError::CorruptFormat(format!(
                        "Node {} links more than {expected} children",
                        node.key()
                    )));
                }
                let child = self.live(key).await?;
                next = child.right_sibling_key();
                children.push(child);
            }
            pending.extend(children.into_iter().rev());
        }

        Ok(keys)
    }
}

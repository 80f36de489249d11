use std::fmt::Debug;

use crate::{SaplingNodeError, Writer};

/// Dense 64-bit identifier of a node record.
pub type NodeKey = u64;

/// Key of the document root in every tree-shaped resource.
pub const ROOT_NODE_KEY: NodeKey = 0;

/// What the bucket layer needs to know about a node record.
///
/// Structural accessors default to "no links" so record families without a
/// tree shape only implement identity, hashing and serialization.
pub trait NodeRecord: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Key of this record
    fn key(&self) -> NodeKey;

    /// Key of the parent record, if any
    fn parent_key(&self) -> Option<NodeKey>;

    /// Tag passed back to [NodeFactory::deserialize]
    fn kind_tag(&self) -> u8;

    /// Stored subtree hash
    fn hash(&self) -> u64;

    /// Overwrite the stored subtree hash
    fn set_hash(&mut self, hash: u64);

    /// Digest of this record's own payload, excluding structural links and
    /// the stored hash
    fn content_hash(&self) -> u64;

    /// Whether this record marks a deleted key
    fn is_tombstone(&self) -> bool;

    /// Write the record body (everything except the kind tag)
    fn write_body(&self, writer: &mut Writer) -> Result<(), SaplingNodeError>;

    /// Serialize the record body
    fn serialize(&self) -> Result<Vec<u8>, SaplingNodeError> {
        let mut writer = Writer::new();
        self.write_body(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// Whether the record still has structural children
    fn has_children(&self) -> bool {
        self.child_count() > 0
    }

    /// Key of the first structural child
    fn first_child_key(&self) -> Option<NodeKey> {
        None
    }

    /// Key of the preceding sibling
    fn left_sibling_key(&self) -> Option<NodeKey> {
        None
    }

    /// Key of the following sibling
    fn right_sibling_key(&self) -> Option<NodeKey> {
        None
    }

    /// Number of structural children
    fn child_count(&self) -> u32 {
        0
    }
}

/// Rebuilds records from their serialized form, and supplies the records a
/// resource is created with.
pub trait NodeFactory: Send + Sync + 'static {
    /// The record family produced by this factory
    type Node: NodeRecord;

    /// Identifier recorded in a resource's configuration
    fn id(&self) -> &'static str;

    /// Decode a record body written by [NodeRecord::serialize]
    fn deserialize(&self, kind: u8, bytes: &[u8]) -> Result<Self::Node, SaplingNodeError>;

    /// The record left behind when `node` is removed
    fn tombstone(&self, node: &Self::Node) -> Self::Node;

    /// The record stored at [ROOT_NODE_KEY] when a resource is created
    fn bootstrap(&self) -> Option<Self::Node>;
}

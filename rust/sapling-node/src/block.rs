use crate::{ContentHasher, NodeFactory, NodeKey, NodeRecord, Reader, SaplingNodeError, Writer};

const BLOCK_TAG: u8 = 1;
const DELETED_BLOCK_TAG: u8 = 2;

/// A fixed-address chunk of raw bytes, as used by block-device style
/// resources. Blocks have no parent and no structural links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNode {
    key: NodeKey,
    hash: u64,
    bytes: Option<Vec<u8>>,
}

impl BlockNode {
    /// A block holding `bytes`
    pub fn new(key: NodeKey, bytes: impl Into<Vec<u8>>) -> Self {
        let mut block = Self {
            key,
            hash: 0,
            bytes: Some(bytes.into()),
        };
        block.hash = block.content_hash();
        block
    }

    /// The stored bytes, `None` once the block was removed
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }
}

impl NodeRecord for BlockNode {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn parent_key(&self) -> Option<NodeKey> {
        None
    }

    fn kind_tag(&self) -> u8 {
        match self.bytes {
            Some(_) => BLOCK_TAG,
            None => DELETED_BLOCK_TAG,
        }
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn set_hash(&mut self, hash: u64) {
        self.hash = hash;
    }

    fn content_hash(&self) -> u64 {
        let hasher = ContentHasher::new(self.kind_tag()).u64(self.key);
        match &self.bytes {
            Some(bytes) => hasher.bytes(bytes).finish(),
            None => hasher.finish(),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.bytes.is_none()
    }

    fn write_body(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write_u64(self.key);
        writer.write_u64(self.hash);
        if let Some(bytes) = &self.bytes {
            writer.write_blob(bytes)?;
        }
        Ok(())
    }
}

/// [NodeFactory] for [BlockNode] records.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockNodeFactory;

impl BlockNodeFactory {
    /// Identifier of this factory
    pub const ID: &'static str = "block";
}

impl NodeFactory for BlockNodeFactory {
    type Node = BlockNode;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn deserialize(&self, kind: u8, bytes: &[u8]) -> Result<BlockNode, SaplingNodeError> {
        let reader = Reader::new(bytes);
        let key = reader.read_u64()?;
        let hash = reader.read_u64()?;
        let bytes = match kind {
            BLOCK_TAG => Some(reader.read_blob()?),
            DELETED_BLOCK_TAG => None,
            unknown => {
                return Err(SaplingNodeError::CorruptFormat(format!(
                    "Unknown block kind {unknown}"
                )));
            }
        };
        reader.finish()?;
        Ok(BlockNode { key, hash, bytes })
    }

    fn tombstone(&self, node: &BlockNode) -> BlockNode {
        BlockNode {
            key: node.key,
            hash: 0,
            bytes: None,
        }
    }

    fn bootstrap(&self) -> Option<BlockNode> {
        None
    }
}

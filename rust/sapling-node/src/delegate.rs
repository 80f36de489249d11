//! Field groups shared by the node kinds. Each kind is assembled from the
//! delegates it needs and serializes them in a fixed order.

use crate::{NodeKey, ReadFrom, Reader, SaplingNodeError, WriteInto, Writer};

/// Identity of a node: its own key, its parent and its subtree hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDelegate {
    /// Key of this node
    pub key: NodeKey,
    /// Key of the parent node, absent only for the document root
    pub parent: Option<NodeKey>,
    /// Rolling hash over this node and its descendants
    pub hash: u64,
}

impl NodeDelegate {
    /// Identity for a new node with a zero hash
    pub fn new(key: NodeKey, parent: Option<NodeKey>) -> Self {
        Self {
            key,
            parent,
            hash: 0,
        }
    }
}

impl WriteInto for NodeDelegate {
    fn write_into(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write_u64(self.key);
        writer.write_link(self.parent)?;
        writer.write_u64(self.hash);
        Ok(())
    }
}

impl ReadFrom for NodeDelegate {
    fn read_from(reader: &Reader<'_>) -> Result<Self, SaplingNodeError> {
        Ok(Self {
            key: reader.read_u64()?,
            parent: reader.read_link()?,
            hash: reader.read_u64()?,
        })
    }
}

/// Structural links of a node that takes part in the child/sibling tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructDelegate {
    /// Key of the first child
    pub first_child: Option<NodeKey>,
    /// Key of the preceding sibling
    pub left_sibling: Option<NodeKey>,
    /// Key of the following sibling
    pub right_sibling: Option<NodeKey>,
    /// Number of structural children
    pub child_count: u32,
}

impl WriteInto for StructDelegate {
    fn write_into(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write_link(self.first_child)?;
        writer.write_link(self.left_sibling)?;
        writer.write_link(self.right_sibling)?;
        writer.write_u32(self.child_count);
        Ok(())
    }
}

impl ReadFrom for StructDelegate {
    fn read_from(reader: &Reader<'_>) -> Result<Self, SaplingNodeError> {
        Ok(Self {
            first_child: reader.read_link()?,
            left_sibling: reader.read_link()?,
            right_sibling: reader.read_link()?,
            child_count: reader.read_u32()?,
        })
    }
}

/// Interned qualified name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NameDelegate {
    /// Interned local name
    pub name_key: i32,
    /// Interned namespace URI
    pub uri_key: i32,
}

impl WriteInto for NameDelegate {
    fn write_into(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write_i32(self.name_key);
        writer.write_i32(self.uri_key);
        Ok(())
    }
}

impl ReadFrom for NameDelegate {
    fn read_from(reader: &Reader<'_>) -> Result<Self, SaplingNodeError> {
        Ok(Self {
            name_key: reader.read_i32()?,
            uri_key: reader.read_i32()?,
        })
    }
}

/// Typed raw value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueDelegate {
    /// Interned type name of the value
    pub type_key: i32,
    /// Raw value bytes
    pub value: Vec<u8>,
}

impl ValueDelegate {
    /// A value of the given type
    pub fn new(type_key: i32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            type_key,
            value: value.into(),
        }
    }
}

impl WriteInto for ValueDelegate {
    fn write_into(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write_i32(self.type_key);
        writer.write_blob(&self.value)
    }
}

impl ReadFrom for ValueDelegate {
    fn read_from(reader: &Reader<'_>) -> Result<Self, SaplingNodeError> {
        Ok(Self {
            type_key: reader.read_i32()?,
            value: reader.read_blob()?,
        })
    }
}

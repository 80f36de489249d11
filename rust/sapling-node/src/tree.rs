use crate::{
    ContentHasher, NameDelegate, NodeDelegate, NodeFactory, NodeKey, NodeRecord, ROOT_NODE_KEY,
    ReadFrom, Reader, SaplingNodeError, StructDelegate, ValueDelegate, Writer,
};

/// Kind tags of [TreeNode] records, as written to storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Named structural node carrying attributes and namespaces
    Element = 1,
    /// Name/value pair owned by an element
    Attribute = 2,
    /// Structural leaf carrying a value
    Text = 3,
    /// Tombstone left in place of a removed node
    Deleted = 5,
    /// The single root of a document
    DocumentRoot = 9,
    /// Namespace declaration owned by an element
    Namespace = 13,
}

impl TryFrom<u8> for NodeKind {
    type Error = SaplingNodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => NodeKind::Element,
            2 => NodeKind::Attribute,
            3 => NodeKind::Text,
            5 => NodeKind::Deleted,
            9 => NodeKind::DocumentRoot,
            13 => NodeKind::Namespace,
            unknown => {
                return Err(SaplingNodeError::CorruptFormat(format!(
                    "Unknown node kind {unknown}"
                )));
            }
        })
    }
}

/// A node of a tree-shaped (XML-like) document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    /// See [NodeKind::DocumentRoot]
    DocumentRoot {
        /// Identity
        node: NodeDelegate,
        /// Structural links
        structure: StructDelegate,
    },
    /// See [NodeKind::Element]
    Element {
        /// Identity
        node: NodeDelegate,
        /// Structural links
        structure: StructDelegate,
        /// Qualified name
        name: NameDelegate,
        /// Keys of owned attribute records, in document order
        attributes: Vec<NodeKey>,
        /// Keys of owned namespace records, in document order
        namespaces: Vec<NodeKey>,
    },
    /// See [NodeKind::Text]
    Text {
        /// Identity
        node: NodeDelegate,
        /// Structural links
        structure: StructDelegate,
        /// Character data
        value: ValueDelegate,
    },
    /// See [NodeKind::Attribute]
    Attribute {
        /// Identity
        node: NodeDelegate,
        /// Qualified name
        name: NameDelegate,
        /// Attribute value
        value: ValueDelegate,
    },
    /// See [NodeKind::Namespace]
    Namespace {
        /// Identity
        node: NodeDelegate,
        /// Prefix and URI
        name: NameDelegate,
    },
    /// See [NodeKind::Deleted]
    Deleted {
        /// Identity of the removed node
        node: NodeDelegate,
    },
}

/// Payload of a structural node created through the tree editing operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeContent {
    /// An element with the given name
    Element(NameDelegate),
    /// A text node with the given value
    Text(ValueDelegate),
}

impl TreeNode {
    /// An empty document root
    pub fn document_root() -> Self {
        TreeNode::DocumentRoot {
            node: NodeDelegate::new(ROOT_NODE_KEY, None),
            structure: StructDelegate::default(),
        }
    }

    /// An element without links, attributes or namespaces
    pub fn element(key: NodeKey, parent: NodeKey, name: NameDelegate) -> Self {
        TreeNode::Element {
            node: NodeDelegate::new(key, Some(parent)),
            structure: StructDelegate::default(),
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// A text node without links
    pub fn text(key: NodeKey, parent: NodeKey, value: ValueDelegate) -> Self {
        TreeNode::Text {
            node: NodeDelegate::new(key, Some(parent)),
            structure: StructDelegate::default(),
            value,
        }
    }

    /// An attribute owned by `parent`
    pub fn attribute(key: NodeKey, parent: NodeKey, name: NameDelegate, value: ValueDelegate) -> Self {
        TreeNode::Attribute {
            node: NodeDelegate::new(key, Some(parent)),
            name,
            value,
        }
    }

    /// A namespace owned by `parent`
    pub fn namespace(key: NodeKey, parent: NodeKey, name: NameDelegate) -> Self {
        TreeNode::Namespace {
            node: NodeDelegate::new(key, Some(parent)),
            name,
        }
    }

    /// A structural node built from `content`
    pub fn from_content(key: NodeKey, parent: NodeKey, content: TreeContent) -> Self {
        match content {
            TreeContent::Element(name) => TreeNode::element(key, parent, name),
            TreeContent::Text(value) => TreeNode::text(key, parent, value),
        }
    }

    /// The kind of this node
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::DocumentRoot { .. } => NodeKind::DocumentRoot,
            TreeNode::Element { .. } => NodeKind::Element,
            TreeNode::Text { .. } => NodeKind::Text,
            TreeNode::Attribute { .. } => NodeKind::Attribute,
            TreeNode::Namespace { .. } => NodeKind::Namespace,
            TreeNode::Deleted { .. } => NodeKind::Deleted,
        }
    }

    /// Identity fields
    pub fn node(&self) -> &NodeDelegate {
        match self {
            TreeNode::DocumentRoot { node, .. }
            | TreeNode::Element { node, .. }
            | TreeNode::Text { node, .. }
            | TreeNode::Attribute { node, .. }
            | TreeNode::Namespace { node, .. }
            | TreeNode::Deleted { node } => node,
        }
    }

    fn node_mut(&mut self) -> &mut NodeDelegate {
        match self {
            TreeNode::DocumentRoot { node, .. }
            | TreeNode::Element { node, .. }
            | TreeNode::Text { node, .. }
            | TreeNode::Attribute { node, .. }
            | TreeNode::Namespace { node, .. }
            | TreeNode::Deleted { node } => node,
        }
    }

    /// Structural links, for kinds that have them
    pub fn structure(&self) -> Option<&StructDelegate> {
        match self {
            TreeNode::DocumentRoot { structure, .. }
            | TreeNode::Element { structure, .. }
            | TreeNode::Text { structure, .. } => Some(structure),
            _ => None,
        }
    }

    /// Mutable structural links, for kinds that have them
    pub fn structure_mut(&mut self) -> Option<&mut StructDelegate> {
        match self {
            TreeNode::DocumentRoot { structure, .. }
            | TreeNode::Element { structure, .. }
            | TreeNode::Text { structure, .. } => Some(structure),
            _ => None,
        }
    }

    /// Name fields, for kinds that have them
    pub fn name(&self) -> Option<&NameDelegate> {
        match self {
            TreeNode::Element { name, .. }
            | TreeNode::Attribute { name, .. }
            | TreeNode::Namespace { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Value fields, for kinds that have them
    pub fn value(&self) -> Option<&ValueDelegate> {
        match self {
            TreeNode::Text { value, .. } | TreeNode::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Mutable value fields, for kinds that have them
    pub fn value_mut(&mut self) -> Option<&mut ValueDelegate> {
        match self {
            TreeNode::Text { value, .. } | TreeNode::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Keys of the attributes owned by an element
    pub fn attribute_keys(&self) -> &[NodeKey] {
        match self {
            TreeNode::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Keys of the namespaces owned by an element
    pub fn namespace_keys(&self) -> &[NodeKey] {
        match self {
            TreeNode::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    /// Mutable attribute and namespace key lists of an element
    pub fn owned_keys_mut(&mut self) -> Option<(&mut Vec<NodeKey>, &mut Vec<NodeKey>)> {
        match self {
            TreeNode::Element {
                attributes,
                namespaces,
                ..
            } => Some((attributes, namespaces)),
            _ => None,
        }
    }
}

impl NodeRecord for TreeNode {
    fn key(&self) -> NodeKey {
        self.node().key
    }

    fn parent_key(&self) -> Option<NodeKey> {
        self.node().parent
    }

    fn kind_tag(&self) -> u8 {
        self.kind() as u8
    }

    fn hash(&self) -> u64 {
        self.node().hash
    }

    fn set_hash(&mut self, hash: u64) {
        self.node_mut().hash = hash;
    }

    fn content_hash(&self) -> u64 {
        let node = self.node();
        let mut hasher = ContentHasher::new(self.kind_tag())
            .u64(node.key)
            .u64(node.parent.unwrap_or(crate::NULL_LINK));
        if let Some(name) = self.name() {
            hasher = hasher.i32(name.name_key).i32(name.uri_key);
        }
        if let Some(value) = self.value() {
            hasher = hasher.i32(value.type_key).bytes(&value.value);
        }
        hasher.finish()
    }

    fn is_tombstone(&self) -> bool {
        matches!(self, TreeNode::Deleted { .. })
    }

    fn write_body(&self, writer: &mut Writer) -> Result<(), SaplingNodeError> {
        writer.write(self.node())?;
        match self {
            TreeNode::DocumentRoot { structure, .. } => writer.write(structure),
            TreeNode::Element {
                structure,
                name,
                attributes,
                namespaces,
                ..
            } => {
                writer.write(structure)?;
                writer.write(name)?;
                writer.write_keys(attributes)?;
                writer.write_keys(namespaces)
            }
            TreeNode::Text {
                structure, value, ..
            } => {
                writer.write(structure)?;
                writer.write(value)
            }
            TreeNode::Attribute { name, value, .. } => {
                writer.write(name)?;
                writer.write(value)
            }
            TreeNode::Namespace { name, .. } => writer.write(name),
            TreeNode::Deleted { .. } => Ok(()),
        }
    }

    fn has_children(&self) -> bool {
        self.child_count() > 0
            || !self.attribute_keys().is_empty()
            || !self.namespace_keys().is_empty()
    }

    fn first_child_key(&self) -> Option<NodeKey> {
        self.structure().and_then(|structure| structure.first_child)
    }

    fn left_sibling_key(&self) -> Option<NodeKey> {
        self.structure().and_then(|structure| structure.left_sibling)
    }

    fn right_sibling_key(&self) -> Option<NodeKey> {
        self.structure().and_then(|structure| structure.right_sibling)
    }

    fn child_count(&self) -> u32 {
        self.structure()
            .map(|structure| structure.child_count)
            .unwrap_or_default()
    }
}

/// [NodeFactory] for [TreeNode] records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeNodeFactory;

impl TreeNodeFactory {
    /// Identifier of this factory
    pub const ID: &'static str = "tree";
}

impl NodeFactory for TreeNodeFactory {
    type Node = TreeNode;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn deserialize(&self, kind: u8, bytes: &[u8]) -> Result<TreeNode, SaplingNodeError> {
        let kind = NodeKind::try_from(kind)?;
        let reader = Reader::new(bytes);
        let node = NodeDelegate::read_from(&reader)?;

        let record = match kind {
            NodeKind::DocumentRoot => TreeNode::DocumentRoot {
                node,
                structure: reader.read()?,
            },
            NodeKind::Element => TreeNode::Element {
                node,
                structure: reader.read()?,
                name: reader.read()?,
                attributes: reader.read_keys()?,
                namespaces: reader.read_keys()?,
            },
            NodeKind::Text => TreeNode::Text {
                node,
                structure: reader.read()?,
                value: reader.read()?,
            },
            NodeKind::Attribute => TreeNode::Attribute {
                node,
                name: reader.read()?,
                value: reader.read()?,
            },
            NodeKind::Namespace => TreeNode::Namespace {
                node,
                name: reader.read()?,
            },
            NodeKind::Deleted => TreeNode::Deleted { node },
        };
        reader.finish()?;
        Ok(record)
    }

    fn tombstone(&self, node: &TreeNode) -> TreeNode {
        TreeNode::Deleted {
            node: NodeDelegate::new(node.key(), node.parent_key()),
        }
    }

    fn bootstrap(&self) -> Option<TreeNode> {
        let mut root = TreeNode::document_root();
        root.set_hash(root.content_hash());
        Some(root)
    }
}

use sapling_node::{
    NameDelegate, NodeKey, NodeKind, NodeRecord, ROOT_NODE_KEY, StructDelegate, TreeContent,
    TreeNode, TreeNodeFactory, ValueDelegate,
};

use crate::{BucketBackend, BucketWriteTransaction, SaplingBucketError};

fn invalid(message: String) -> SaplingBucketError {
    SaplingBucketError::InvalidOperation(message)
}

/// Document editing on top of the generic record operations. Every change is
/// routed through `insert`, `update` and `remove`, so subtree hashes follow.
impl<Backend> BucketWriteTransaction<TreeNodeFactory, Backend>
where
    Backend: BucketBackend,
{
    async fn live_tree_node(&self, key: NodeKey) -> Result<TreeNode, SaplingBucketError> {
        match self.get_node(key).await? {
            Some(node) if !node.is_tombstone() => Ok(node),
            _ => Err(invalid(format!("No live node under key {key}"))),
        }
    }

    async fn container(&self, key: NodeKey) -> Result<TreeNode, SaplingBucketError> {
        let node = self.live_tree_node(key).await?;
        match node.kind() {
            NodeKind::DocumentRoot | NodeKind::Element => Ok(node),
            kind => Err(invalid(format!("A {kind:?} node cannot hold children"))),
        }
    }

    async fn element(&self, key: NodeKey) -> Result<TreeNode, SaplingBucketError> {
        let node = self.live_tree_node(key).await?;
        match node.kind() {
            NodeKind::Element => Ok(node),
            kind => Err(invalid(format!("Node {key} is a {kind:?}, not an element"))),
        }
    }

    /// Apply `edit` to the structural links of the live node under `key`.
    async fn relink(
        &mut self,
        key: NodeKey,
        edit: impl FnOnce(&mut StructDelegate),
    ) -> Result<(), SaplingBucketError> {
        let mut node = self.live_tree_node(key).await?;
        let structure = node
            .structure_mut()
            .ok_or_else(|| invalid(format!("Node {key} has no structural links")))?;
        edit(structure);
        self.update(node).await?;
        Ok(())
    }

    /// Insert `content` as the new first child of `parent`
    pub async fn insert_first_child(
        &mut self,
        parent: NodeKey,
        content: TreeContent,
    ) -> Result<NodeKey, SaplingBucketError> {
        let container = self.container(parent).await?;
        let old_first = container.first_child_key();

        let key = self.allocate_node_key()?;
        let mut child = TreeNode::from_content(key, parent, content);
        if let Some(structure) = child.structure_mut() {
            structure.right_sibling = old_first;
        }
        self.insert(child).await?;

        if let Some(sibling) = old_first {
            self.relink(sibling, |structure| structure.left_sibling = Some(key))
                .await?;
        }
        self.relink(parent, |structure| {
            structure.first_child = Some(key);
            structure.child_count += 1;
        })
        .await?;
        Ok(key)
    }

    /// Insert `content` directly after `left`
    pub async fn insert_right_sibling(
        &mut self,
        left: NodeKey,
        content: TreeContent,
    ) -> Result<NodeKey, SaplingBucketError> {
        let left_node = self.live_tree_node(left).await?;
        let parent = match (left_node.structure(), left_node.parent_key()) {
            (Some(_), Some(parent)) => parent,
            _ => return Err(invalid(format!("Node {left} cannot have siblings"))),
        };
        let old_right = left_node.right_sibling_key();

        let key = self.allocate_node_key()?;
        let mut child = TreeNode::from_content(key, parent, content);
        if let Some(structure) = child.structure_mut() {
            structure.left_sibling = Some(left);
            structure.right_sibling = old_right;
        }
        self.insert(child).await?;

        if let Some(sibling) = old_right {
            self.relink(sibling, |structure| structure.left_sibling = Some(key))
                .await?;
        }
        self.relink(left, |structure| structure.right_sibling = Some(key))
            .await?;
        self.relink(parent, |structure| structure.child_count += 1)
            .await?;
        Ok(key)
    }

    /// Insert `content` as the last child of `parent`
    pub async fn append_child(
        &mut self,
        parent: NodeKey,
        content: TreeContent,
    ) -> Result<NodeKey, SaplingBucketError> {
        let container = self.container(parent).await?;
        let Some(mut last) = container.first_child_key() else {
            return self.insert_first_child(parent, content).await;
        };
        while let Some(next) = self.live_tree_node(last).await?.right_sibling_key() {
            last = next;
        }
        self.insert_right_sibling(last, content).await
    }

    /// Add an attribute to `element`
    pub async fn insert_attribute(
        &mut self,
        element: NodeKey,
        name: NameDelegate,
        value: ValueDelegate,
    ) -> Result<NodeKey, SaplingBucketError> {
        self.element(element).await?;
        let key = self.allocate_node_key()?;
        self.insert(TreeNode::attribute(key, element, name, value))
            .await?;

        let mut owner = self.element(element).await?;
        if let Some((attributes, _)) = owner.owned_keys_mut() {
            attributes.push(key);
        }
        self.update(owner).await?;
        Ok(key)
    }

    /// Add a namespace declaration to `element`
    pub async fn insert_namespace(
        &mut self,
        element: NodeKey,
        name: NameDelegate,
    ) -> Result<NodeKey, SaplingBucketError> {
        self.element(element).await?;
        let key = self.allocate_node_key()?;
        self.insert(TreeNode::namespace(key, element, name)).await?;

        let mut owner = self.element(element).await?;
        if let Some((_, namespaces)) = owner.owned_keys_mut() {
            namespaces.push(key);
        }
        self.update(owner).await?;
        Ok(key)
    }

    /// Replace the value of a text or attribute node
    pub async fn update_value(
        &mut self,
        key: NodeKey,
        value: ValueDelegate,
    ) -> Result<TreeNode, SaplingBucketError> {
        let mut node = self.live_tree_node(key).await?;
        let slot = node
            .value_mut()
            .ok_or_else(|| invalid(format!("Node {key} carries no value")))?;
        *slot = value;
        self.update(node).await
    }

    /// Remove the node under `key` together with its attributes and
    /// namespaces, unlinking it from its siblings and parent. Structural
    /// children must be removed first.
    pub async fn remove_node(&mut self, key: NodeKey) -> Result<(), SaplingBucketError> {
        if key == ROOT_NODE_KEY {
            return Err(invalid("The document root cannot be removed".into()));
        }
        let node = self.live_tree_node(key).await?;
        if node.child_count() > 0 {
            return Err(invalid(format!("Node {key} still has children")));
        }
        let parent = node
            .parent_key()
            .ok_or_else(|| invalid(format!("Node {key} has no parent")))?;

        match node.kind() {
            NodeKind::Attribute | NodeKind::Namespace => {
                let mut owner = self.element(parent).await?;
                if let Some((attributes, namespaces)) = owner.owned_keys_mut() {
                    attributes.retain(|owned| *owned != key);
                    namespaces.retain(|owned| *owned != key);
                }
                self.update(owner).await?;
            }
            _ => {
                let owned: Vec<NodeKey> = node
                    .attribute_keys()
                    .iter()
                    .chain(node.namespace_keys())
                    .copied()
                    .collect();
                if !owned.is_empty() {
                    let mut element = node.clone();
                    if let Some((attributes, namespaces)) = element.owned_keys_mut() {
                        attributes.clear();
                        namespaces.clear();
                    }
                    self.update(element).await?;
                    for owned_key in owned {
                        self.remove(owned_key).await?;
                    }
                }

                let left = node.left_sibling_key();
                let right = node.right_sibling_key();
                if let Some(left) = left {
                    self.relink(left, |structure| structure.right_sibling = right)
                        .await?;
                }
                if let Some(right) = right {
                    self.relink(right, |structure| structure.left_sibling = left)
                        .await?;
                }
                self.relink(parent, |structure| {
                    if structure.first_child == Some(key) {
                        structure.first_child = right;
                    }
                    structure.child_count = structure.child_count.saturating_sub(1);
                })
                .await?;
            }
        }

        self.remove(key).await?;
        Ok(())
    }
}

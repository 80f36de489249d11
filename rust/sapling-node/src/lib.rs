#![warn(missing_docs)]

//! Node records for the Sapling store and the fixed-layout binary codec they
//! are written with.
//!
//! The bucket layer never looks inside a node. It only needs the handful of
//! accessors on [NodeRecord] and a [NodeFactory] able to rebuild a record
//! from its kind tag and serialized body. Two families are provided: the
//! tree-shaped [TreeNode] (document root, elements, text, attributes,
//! namespaces, tombstones) and the opaque [BlockNode].

mod error;
pub use error::*;

mod codec;
pub use codec::*;

mod delegate;
pub use delegate::*;

mod record;
pub use record::*;

mod tree;
pub use tree::*;

mod block;
pub use block::*;

mod hash;
pub use hash::*;

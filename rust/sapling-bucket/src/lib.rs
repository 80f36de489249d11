#![warn(missing_docs)]

//! The versioned bucket tree at the heart of the Sapling store.
//!
//! Every committed change produces a new immutable revision. A revision is a
//! [RevisionRootBucket] whose node data hangs off a constant-depth radix tree
//! of [IndirectBucket]s ending in [DataBucket]s. Commits copy only the path
//! from a changed [DataBucket] up to the root, so revisions share every
//! untouched bucket. The single [UberBucket] names the latest revision and is
//! written last, which makes it the one publication point of a commit.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), sapling_bucket::SaplingBucketError> {
//! use sapling_bucket::{ResourceConfig, Session};
//! use sapling_node::{TreeNode, TreeNodeFactory, ValueDelegate, ROOT_NODE_KEY};
//!
//! let session = Session::open_directory(
//!     "/tmp/resource",
//!     TreeNodeFactory,
//!     ResourceConfig::new(TreeNodeFactory::ID),
//! )
//! .await?;
//!
//! let mut writer = session.begin_write_transaction().await?;
//! let key = writer.allocate_node_key()?;
//! writer
//!     .insert(TreeNode::text(key, ROOT_NODE_KEY, ValueDelegate::new(0, "hi")))
//!     .await?;
//! let revision = writer.commit().await?;
//!
//! let reader = session.begin_read_transaction(revision).await?;
//! assert!(reader.get_node(key).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod key;
pub use key::*;

mod radix;
pub use radix::*;

mod bucket;
pub use bucket::*;

mod store;
pub use store::*;

mod cache;
pub use cache::*;

mod config;
pub use config::*;

mod transaction_log;
pub use transaction_log::*;

mod read;
pub use read::*;

mod write;
pub use write::*;

mod session;
pub use session::*;

mod cursor;
pub use cursor::*;

mod tree;

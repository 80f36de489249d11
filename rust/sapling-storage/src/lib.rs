#![warn(missing_docs)]

//! Byte-level persistence for the Sapling store.
//!
//! Everything above this crate speaks in serialized buckets addressed by
//! opaque byte keys. A [StorageBackend] is the only thing the rest of the
//! workspace knows about durable storage, so any of the provided backends
//! (or a combination of them) can sit underneath a store:
//!
//! ```rust
//! use sapling_storage::{
//!     CombinedStorageBackend, MemoryStorageBackend, TransformPipeline,
//!     TransformedStorageBackend,
//! };
//!
//! let local = MemoryStorageBackend::<Vec<u8>, Vec<u8>>::default();
//! let remote = MemoryStorageBackend::<Vec<u8>, Vec<u8>>::default();
//!
//! let pipeline = TransformPipeline::from_ids(&["brotli", "checksum"]).unwrap();
//! let backend = TransformedStorageBackend::new(
//!     CombinedStorageBackend::new(local, remote),
//!     pipeline,
//! );
//! # let _ = backend;
//! ```

mod error;
pub use error::*;

mod storage;
pub use storage::*;

mod transform;
pub use transform::*;

#[cfg(any(test, feature = "helpers"))]
mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::*;

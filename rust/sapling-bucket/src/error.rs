use sapling_node::SaplingNodeError;
use sapling_storage::SaplingStorageError;
use thiserror::Error;

use crate::BucketKey;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum SaplingBucketError {
    /// The backend failed to read or write
    #[error("I/O error: {0}")]
    Io(#[from] SaplingStorageError),

    /// Stored bytes did not decode into the expected bucket or node
    #[error("Corrupt format: {0}")]
    CorruptFormat(String),

    /// A value could not be encoded
    #[error("Failed to encode: {0}")]
    EncodeFailed(String),

    /// A bucket referenced by the tree is absent from the backend
    #[error("Bucket {0} is referenced but missing from storage")]
    MissingBucket(BucketKey),

    /// Another write transaction is already active
    #[error("A write transaction is already active")]
    ConcurrentWriteViolation,

    /// The requested revision has not been committed
    #[error("Revision {requested} does not exist (latest: {latest:?})")]
    InvalidRevision {
        /// Revision asked for
        requested: u64,
        /// Latest committed revision, if any
        latest: Option<u64>,
    },

    /// The transaction was already closed, committed or aborted
    #[error("Transaction is closed")]
    TransactionClosed,

    /// The owning session was closed
    #[error("Session is closed")]
    SessionClosed,

    /// The operation is not valid for the addressed record
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The resource configuration is unusable
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<SaplingNodeError> for SaplingBucketError {
    fn from(error: SaplingNodeError) -> Self {
        match error {
            SaplingNodeError::CorruptFormat(message) => SaplingBucketError::CorruptFormat(message),
            SaplingNodeError::EncodeFailed(message) => SaplingBucketError::EncodeFailed(message),
        }
    }
}

use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug)]
pub enum SaplingStorageError {
    /// A backend failed to read or write
    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    /// A byte transform could not be applied or inverted
    #[error("Byte transform failed: {0}")]
    Transform(String),

    /// Stored bytes did not match their recorded checksum
    #[error("Byte hash verification failed: {0}")]
    Verification(String),

    /// The backend was used after it was closed
    #[error("Storage backend is closed")]
    Closed,
}

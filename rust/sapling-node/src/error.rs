use thiserror::Error;

/// The common error type used by this crate
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SaplingNodeError {
    /// Bytes did not decode into a well-formed record
    #[error("Corrupt format: {0}")]
    CorruptFormat(String),

    /// A value does not fit its fixed-width encoding
    #[error("Failed to encode: {0}")]
    EncodeFailed(String),
}

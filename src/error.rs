//! Error types for the metric store

use thiserror::Error;

/// Main error type for the metric store
#[derive(Error, Debug)]
pub enum Error {
    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Label codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Instrument was declared with invalid or inconsistent options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation is not supported by this backend
    ///
    /// Live read-backs of aggregate state (e.g. a counter's current value)
    /// are not available from the writing process; only `collect` sees the
    /// shared state.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

/// Storage errors
///
/// Every Redis round-trip failure surfaces here; callers decide whether to
/// drop the observation or propagate. Failures are never silently swallowed.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store could not be reached or an atomic operation failed
    #[error("redis unavailable: {0}")]
    Unavailable(String),

    /// A command did not complete within the configured timeout
    #[error("command timed out")]
    Timeout,

    /// Stored data could not be interpreted (signals corruption, not a
    /// normal condition)
    #[error("stored data corrupted: {0}")]
    Corrupted(String),
}

/// Label encoding/decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Label values could not be serialized
    #[error("label encoding failed: {0}")]
    Encode(String),

    /// A stored key fragment could not be decoded back into label values
    #[error("label decoding failed: {0}")]
    Decode(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

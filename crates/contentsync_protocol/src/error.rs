//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building, validating or (de)serializing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// A content item's carried checksum does not match its fields.
    #[error("checksum mismatch for item {id}: carried {carried}, computed {computed}")]
    ItemChecksumMismatch {
        /// Item id.
        id: String,
        /// Checksum that came with the item.
        carried: String,
        /// Checksum recomputed from the item's fields.
        computed: String,
    },

    /// A bounded collection exceeded its cap.
    #[error("too many {what}: {count} > {max}")]
    TooManyEntries {
        /// What was being counted.
        what: &'static str,
        /// Number of entries supplied.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// An asset path failed validation.
    #[error("invalid asset path {path:?}: {reason}")]
    InvalidAssetPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

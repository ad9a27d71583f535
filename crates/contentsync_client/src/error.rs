//! Error types for the sync client.

use contentsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the local key-value and blob stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),

    /// A stored record could not be decoded.
    #[error("corrupt record {key}: {message}")]
    CorruptRecord {
        /// Record key.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// Another process holds the cache directory.
    #[error("cache directory is locked: {0}")]
    Locked(String),

    /// The blob store is out of space.
    #[error("blob store full: need {needed} bytes, {available} available")]
    Full {
        /// Bytes requested.
        needed: u64,
        /// Bytes free.
        available: u64,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors that can occur during sync operations.
///
/// Cloneable so that every caller joined to a run receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A network call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The credential provider's token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// A signed URL was refused as expired or invalid.
    #[error("signed url expired for {path}")]
    UrlExpired {
        /// Asset path.
        path: String,
    },

    /// Downloaded bytes did not match the expected checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Asset path.
        path: String,
        /// Expected checksum.
        expected: String,
        /// Checksum of the received bytes.
        actual: String,
    },

    /// Not enough local space for the pending downloads.
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientDiskSpace {
        /// Bytes required, including headroom.
        required: u64,
        /// Bytes available.
        available: u64,
    },

    /// A bounded request exceeded its cap.
    #[error("request too large: {0}")]
    RequestTooLarge(String),

    /// Protocol error (invalid message format or unexpected status).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Server replied with a 5xx status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The server's manifest has no checksum for a referenced asset.
    #[error("no checksum published for asset {path}")]
    MissingAssetChecksum {
        /// Asset path.
        path: String,
    },

    /// The server could not sign a URL for an asset.
    #[error("server could not sign {path}")]
    SigningFailed {
        /// Asset path.
        path: String,
    },

    /// An item's carried checksum disagrees with its contents.
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// The run was abandoned before producing a result.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { .. } => true,
            SyncError::ChecksumMismatch { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error aborts a whole run rather than one item.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SyncError::RequestTooLarge(_)
                | SyncError::InsufficientDiskSpace { .. }
                | SyncError::Storage(_)
        )
    }

    /// Returns true if this error means the server could not be reached.
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            SyncError::Transport {
                retryable: true,
                ..
            } | SyncError::Timeout
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::TooManyEntries { .. } => SyncError::RequestTooLarge(err.to_string()),
            ProtocolError::ItemChecksumMismatch { .. } => SyncError::InvalidItem(err.to_string()),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

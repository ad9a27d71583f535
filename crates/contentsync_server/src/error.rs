//! Error types for the content server.

use contentsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the content server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A bounded request exceeded its cap. The caller must chunk.
    #[error("request too large: {count} {what} > {max}")]
    RequestTooLarge {
        /// What was being counted.
        what: &'static str,
        /// Number supplied.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Asset path failed validation.
    #[error("invalid asset path: {0}")]
    InvalidAssetPath(String),

    /// Requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Signed URL was rejected.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown endpoint.
    #[error("no route for {0}")]
    NoRoute(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::InvalidAssetPath(_) => 400,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound(_) | ServerError::NoRoute(_) => 404,
            ServerError::RequestTooLarge { .. } => 413,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns a short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::RequestTooLarge { .. } => "REQUEST_TOO_LARGE",
            ServerError::InvalidAssetPath(_) => "INVALID_ASSET_PATH",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Forbidden(_) => "FORBIDDEN",
            ServerError::NoRoute(_) => "NO_ROUTE",
            ServerError::Internal(_) => "INTERNAL",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::TooManyEntries { what, count, max } => {
                ServerError::RequestTooLarge { what, count, max }
            }
            ProtocolError::InvalidAssetPath { .. } => ServerError::InvalidAssetPath(err.to_string()),
            ProtocolError::Encode(msg) => ServerError::Internal(msg),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert_eq!(ServerError::Forbidden("expired".into()).status_code(), 403);
    }

    #[test]
    fn oversized_protocol_error_maps_to_413() {
        let err: ServerError = ProtocolError::TooManyEntries {
            what: "item checksums",
            count: 501,
            max: 500,
        }
        .into();
        assert_eq!(err.status_code(), 413);
        assert!(err.to_string().contains("501"));
    }
}

//! Error types for rsmsl.

use thiserror::Error;

/// Main error type for MSL client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The network exchange failed. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server rejected the key exchange.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The master token (or the entity keys bound to it) is no longer accepted.
    #[error("Master token expired: {0}")]
    TokenExpired(String),

    /// The server returned a decodable error envelope.
    #[error("Protocol error {code}: {message}")]
    Protocol { code: String, message: String },

    /// A response could not be parsed, decrypted or verified.
    #[error("Protocol corruption: {0}")]
    ProtocolCorruption(String),

    /// The hardware DRM session could not be opened.
    #[error("Crypto backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The persisted state blob is unreadable.
    #[error("State corruption: {0}")]
    StateCorruption(String),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Invalid config: {0}")]
    Config(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// RSA error.
    #[error("RSA error: {0}")]
    RsaError(#[from] rsa::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call without a config change can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::TokenExpired(_))
    }

    /// Reclassify decoding failures of server data as corruption.
    pub(crate) fn into_corruption(self) -> Self {
        match self {
            Error::Json(e) => Error::ProtocolCorruption(format!("invalid JSON: {}", e)),
            Error::Base64DecodeError(e) => {
                Error::ProtocolCorruption(format!("invalid base64: {}", e))
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Result type alias for rsmsl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn retryable_kinds() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::TokenExpired("old".into()).is_retryable());
        assert!(!Error::ProtocolCorruption("bad mac".into()).is_retryable());
        assert!(!Error::HandshakeFailed("denied".into()).is_retryable());
    }

    #[test]
    fn decode_errors_become_corruption() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err).into_corruption();
        assert!(matches!(err, Error::ProtocolCorruption(_)));
    }
}

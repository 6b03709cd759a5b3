//! The exception reported by plugin entry points.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ddsec_crypto_core::{CryptoError, ErrorCode};

/// A failed plugin call: a stable numeric code and a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("security exception {code}: {message}")]
pub struct SecurityException {
    pub code: ErrorCode,
    pub message: String,
}

impl SecurityException {
    /// Whether the caller should drop the message and carry on.
    pub fn is_decode_failure(&self) -> bool {
        self.code == ErrorCode::DecodeFailed
    }
}

impl From<CryptoError> for SecurityException {
    fn from(err: CryptoError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, SecurityException>;

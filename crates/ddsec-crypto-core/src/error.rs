//! Error taxonomy shared by every crate of the plugin.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by crypto plugin operations.
///
/// `DecodeFailed` intentionally carries no detail: a caller probing the
/// envelope must not learn whether a key, a MAC or a length was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Unknown, nil, stale or kind-mismatched handle.
    #[error("invalid crypto handle: {0}")]
    InvalidHandle(String),

    /// Missing or malformed argument.
    #[error("invalid crypto argument: {0}")]
    InvalidArgument(String),

    /// Token with a wrong class id, property or key material.
    #[error("invalid crypto token: {0}")]
    InvalidToken(String),

    /// Any structural or cryptographic failure while decoding.
    #[error("decode failed")]
    DecodeFailed,

    /// Unknown transform kind or unsupported configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A budget or platform resource ran out.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl CryptoError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CryptoError::InvalidHandle(_) => ErrorCode::InvalidHandle,
            CryptoError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            CryptoError::InvalidToken(_) => ErrorCode::InvalidToken,
            CryptoError::DecodeFailed => ErrorCode::DecodeFailed,
            CryptoError::Unsupported(_) => ErrorCode::Unsupported,
            CryptoError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
        }
    }

    pub(crate) fn handle(msg: impl Into<String>) -> Self {
        CryptoError::InvalidHandle(msg.into())
    }
}

/// Numeric error codes, aligned with the DDS Security exception numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown or mismatched handle.
    InvalidHandle = 101,
    /// Invalid argument.
    InvalidArgument = 102,
    /// Invalid crypto token.
    InvalidToken = 103,
    /// Unsupported transformation.
    Unsupported = 105,
    /// Decode failure.
    DecodeFailed = 113,
    /// Resource exhausted.
    ResourceExhausted = 115,
}

impl ErrorCode {
    /// The raw numeric value.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

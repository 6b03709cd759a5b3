//! Reasons a received message is dropped.
//!
//! These never leave the crate: the public decode operations log the
//! reason at debug level and return `CryptoError::DecodeFailed`.

use thiserror::Error;

use ddsec_crypto_core::{CryptoError, TransformKind};

#[derive(Debug, Error)]
pub(crate) enum Rejection {
    /// Envelope framing did not parse.
    #[error("malformed secure envelope")]
    Malformed,

    /// No installed key material carries this sender key id.
    #[error("unknown key id {0}")]
    UnknownKey(u32),

    /// The remote has not sent its key material yet.
    #[error("remote key material not installed")]
    KeysNotReady,

    /// Header kind does not match the key material or the protection kind.
    #[error("unexpected transform kind {0:?}")]
    UnexpectedKind(TransformKind),

    /// Origin authentication required but no usable receiver MAC.
    #[error("no receiver specific mac for this endpoint")]
    MissingReceiverMac,

    /// Tag or MAC verification failed.
    #[error("authentication failed")]
    Authentication,

    /// Session key derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(CryptoError),
}

//! # DDS Security Crypto Transform
//!
//! Protects and recovers serialized payloads, datawriter and datareader
//! submessages, and whole RTPS messages with the keys registered in a
//! [`ddsec_crypto_registry::KeyFactory`].
//!
//! ## Protection
//!
//! Each encode charges the plaintext against the sender's session,
//! rotating the session key when its block budget runs out, then either
//! encrypts (AES-GCM) or signs (GMAC) it. With origin authentication every
//! receiver also gets a MAC over the common MAC, keyed with a key only it
//! and the sender hold.
//!
//! ## Decoding
//!
//! Bad handles and arguments are reported as such. Once the input reaches
//! the cryptographic checks, every failure is reported as
//! [`ddsec_crypto_core::CryptoError::DecodeFailed`] and its reason logged
//! at debug level only.
//!
//! ## Triage
//!
//! [`CryptoTransform::preprocess_secure_submsg`] reads only the prefix of
//! a received secure submessage and tells the caller which endpoint pair
//! must decode it.

pub mod envelope;
mod error;
pub mod message;
pub mod submessage;
pub mod transform;
pub mod triage;

pub use envelope::{Content, Envelope, Protected};
pub use transform::CryptoTransform;
pub use triage::SubmessageRoute;

//! # DDS Security Crypto Core
//!
//! Pure primitives for the builtin DDS Security cryptographic plugin: protection
//! and transform kinds, master and session key material, and the bounds-checked
//! wire framing of the secure envelope.
//!
//! This crate contains no registry and no global state. Everything here is
//! computation over key bytes and byte buffers.
//!
//! ## Key Types
//!
//! - [`Handle`] - Generation-checked opaque handle for crypto objects
//! - [`TransformKind`] - Cipher and key size applied to a message
//! - [`MasterKeyMaterial`] - Salt, sender key and optional receiver-specific key
//! - [`SessionKeyMaterial`] - Per-session key with a bounded block budget
//! - [`CryptoHeader`] / [`CryptoFooter`] - Fixed-layout envelope parts
//!
//! ## Cipher
//!
//! Symmetric primitives sit behind the [`Cipher`] trait. [`AesGcmCipher`] is the
//! default implementation (AES-GCM for encryption, GMAC for authentication).

pub mod cipher;
pub mod error;
pub mod keys;
pub mod session;
pub mod types;
pub mod wire;

pub use cipher::{AesGcmCipher, Cipher, Iv, Mac, IV_SIZE, MAC_SIZE};
pub use error::{CryptoError, ErrorCode, Result};
pub use keys::{KeyIdGenerator, MasterKeyMaterial, SharedSecret, CHALLENGE_SIZE};
pub use session::{
    derive_receiver_key, derive_session_key, Advance, SessionConfig, SessionKey,
    SessionKeyMaterial, SessionSnapshot,
};
pub use types::{
    BasicProtectionKind, EndpointSecurityAttributes, Handle, KeySize, ParticipantSecurityAttributes,
    ProtectionKind, Property, PropertySet, TransformKind,
};
pub use wire::{smid, ByteReader, CryptoFooter, CryptoHeader, ReceiverMac, SubmessageHeader};

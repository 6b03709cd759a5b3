//! # DDS Security Crypto
//!
//! The builtin cryptographic plugin of DDS Security: AES-GCM encryption and
//! GMAC authentication of RTPS messages, submessages and serialized payloads.
//!
//! ## Overview
//!
//! - **Registration**: participants and endpoints are registered with the
//!   security attributes decided by access control, and matched with their
//!   remote counterparts.
//! - **Key exchange**: each side hands its master key material to the other
//!   as crypto tokens over the volatile secure endpoints.
//! - **Transforms**: outgoing traffic is protected with per-session keys,
//!   incoming traffic is routed, checked and recovered.
//!
//! ## Usage
//!
//! ```rust
//! use ddsec_crypto::{CryptoConfig, CryptoPlugin};
//! use ddsec_crypto::core::{ParticipantSecurityAttributes, ProtectionKind, PropertySet, SharedSecret};
//!
//! let alice = CryptoPlugin::new(CryptoConfig::default());
//! let bob = CryptoPlugin::new(CryptoConfig::default());
//! let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Encrypt);
//! let secret = SharedSecret::new([1; 32], [2; 32], vec![3; 32]);
//!
//! let a = alice.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
//! let a_bob = alice.register_matched_remote_participant(a, 2, 2, &secret).unwrap();
//! let b = bob.register_local_participant(2, 2, &PropertySet::new(), &attrs).unwrap();
//! let b_alice = bob.register_matched_remote_participant(b, 1, 1, &secret).unwrap();
//!
//! let tokens = alice.create_local_participant_crypto_tokens(a, a_bob).unwrap();
//! bob.set_remote_participant_crypto_tokens(b, b_alice, &tokens).unwrap();
//!
//! let mut message = b"RTPS".to_vec();
//! message.extend_from_slice(&[2, 4, 1, 15, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
//! message.extend_from_slice(&[0x15, 0x01, 4, 0, 0xca, 0xfe, 0xba, 0xbe]);
//!
//! let mut encoded = Vec::new();
//! let mut cursor = 0;
//! alice.encode_rtps_message(&mut encoded, &message, a, &[a_bob], &mut cursor).unwrap();
//! assert_eq!(bob.decode_rtps_message(&encoded, b, b_alice).unwrap(), message);
//! ```
//!
//! ## Re-exports
//!
//! - `ddsec_crypto::core` - kinds, key material, sessions, wire framing
//! - `ddsec_crypto::registry` - handle table and key factory
//! - `ddsec_crypto::exchange` - crypto tokens
//! - `ddsec_crypto::transform` - envelope codec and transforms

pub mod error;
pub mod plugin;

pub use ddsec_crypto_core as core;
pub use ddsec_crypto_exchange as exchange;
pub use ddsec_crypto_registry as registry;
pub use ddsec_crypto_transform as transform;

pub use error::{Result, SecurityException};
pub use plugin::{CryptoConfig, CryptoPlugin};

pub use ddsec_crypto_core::{
    BasicProtectionKind, EndpointSecurityAttributes, ErrorCode, Handle, KeySize,
    ParticipantSecurityAttributes, ProtectionKind, PropertySet, SessionConfig, SharedSecret,
    TransformKind,
};
pub use ddsec_crypto_exchange::CryptoToken;
pub use ddsec_crypto_registry::SecureSubmessageCategory;
pub use ddsec_crypto_transform::SubmessageRoute;

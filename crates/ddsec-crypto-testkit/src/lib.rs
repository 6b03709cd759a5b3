//! # DDS Security Crypto Testkit
//!
//! Testing utilities for the DDS Security crypto plugin.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Key derivations and cipher outputs with known results
//! - **Generators**: Proptest strategies for kinds, payloads and messages
//! - **Fixtures**: Two plugins with matched participants and exchanged tokens
//!
//! ## Golden Vectors
//!
//! ```rust
//! use ddsec_crypto_core::derive_session_key;
//! use ddsec_crypto_testkit::vectors::session_key_vectors;
//!
//! for vector in session_key_vectors() {
//!     let master = vector.master().unwrap();
//!     let key = derive_session_key(&master, vector.session_id).unwrap();
//!     assert_eq!(hex::encode(key.as_bytes()), vector.expected_session_key);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use ddsec_crypto_testkit::generators::payload;
//!
//! proptest! {
//!     #[test]
//!     fn payload_roundtrip(p in payload(64)) {
//!         // encode with one plugin, decode with the other
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use ddsec_crypto::ProtectionKind;
//! use ddsec_crypto_testkit::PeerFixture;
//!
//! let fixture = PeerFixture::new(ProtectionKind::Encrypt);
//! assert!(fixture.alice.plugin.registry().contains(fixture.alice.remote));
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{data_submessage, rtps_message, MatchedEndpoints, Peer, PeerFixture};

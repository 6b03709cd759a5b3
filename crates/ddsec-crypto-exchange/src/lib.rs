//! # DDS Security Crypto Key Exchange
//!
//! Carries master key material between matched participants and endpoints
//! as crypto tokens.
//!
//! ## Token Layout
//!
//! A token is a data holder with class id `DDS:Crypto:AES_GCM_GMAC` and a
//! single binary property `dds.cryp.keymat` whose value is the big-endian
//! serialized key material:
//!
//! ```text
//! kind u32 | salt_len u32 | salt | sender_key_id u32 | key_len u32 | key
//!          | receiver_key_id u32 | receiver_key_len u32 | receiver_key
//! ```
//!
//! ## Flow
//!
//! ```text
//! Local                                   Remote
//!   create_local_participant_crypto_tokens
//!   |-------- participant token ------------>| set_remote_participant_crypto_tokens
//!   create_local_datawriter_crypto_tokens
//!   |-------- message + payload tokens ----->| set_remote_datawriter_crypto_tokens
//!   |<------- reader token ------------------| create_local_datareader_crypto_tokens
//!   set_remote_datareader_crypto_tokens
//! ```
//!
//! Tokens travel over the builtin volatile secure endpoints, which are
//! protected with key-exchange material derived from the shared secret
//! and never need tokens themselves.

pub mod key_exchange;
pub mod tokens;

pub use key_exchange::KeyExchange;
pub use tokens::{
    check_crypto_tokens, deserialize_key_material, serialize_key_material, BinaryProperty,
    CryptoToken, DataHolder, CRYPTO_TOKEN_CLASS_ID, CRYPTO_TOKEN_KEYMAT_PROPERTY,
};

//! Golden test vectors for key derivation and the AES-GCM / GMAC transforms.
//!
//! The expected values were computed independently of this crate, so they
//! pin the wire-visible behavior that another implementation has to match.
//! Key bytes are given as a fill value: `0x22` means every byte is `0x22`.

use serde::Serialize;

use ddsec_crypto_core::{
    CryptoHeader, Iv, MasterKeyMaterial, Result, SharedSecret, TransformKind, CHALLENGE_SIZE,
};

/// Key-exchange material derived from a shared secret.
#[derive(Debug, Clone, Serialize)]
pub struct KeyExchangeVector {
    pub name: &'static str,
    pub challenge1: u8,
    pub challenge2: u8,
    pub secret: u8,
    pub secret_len: usize,
    /// Expected master salt (hex).
    pub expected_salt: &'static str,
    /// Expected master sender key (hex).
    pub expected_key: &'static str,
}

impl KeyExchangeVector {
    pub fn shared_secret(&self) -> SharedSecret {
        SharedSecret::new(
            [self.challenge1; CHALLENGE_SIZE],
            [self.challenge2; CHALLENGE_SIZE],
            vec![self.secret; self.secret_len],
        )
    }
}

/// Session keys derived from master key material.
#[derive(Debug, Clone, Serialize)]
pub struct SessionKeyVector {
    pub name: &'static str,
    pub transform_kind: TransformKind,
    pub salt: u8,
    pub sender_key: u8,
    /// Fill value of the receiver-specific key, if the material has one.
    pub receiver_key: Option<u8>,
    pub session_id: u32,
    pub expected_session_key: &'static str,
    pub expected_receiver_key: Option<&'static str>,
}

impl SessionKeyVector {
    pub fn master(&self) -> Result<MasterKeyMaterial> {
        let size = self.transform_kind.key_size();
        let (receiver_id, receiver_key) = match self.receiver_key {
            Some(fill) => (2, vec![fill; size]),
            None => (0, Vec::new()),
        };
        MasterKeyMaterial::from_parts(
            self.transform_kind,
            &vec![self.salt; size],
            1,
            &vec![self.sender_key; size],
            receiver_id,
            &receiver_key,
        )
    }
}

/// One AES-GCM encryption and one GMAC over the same input.
#[derive(Debug, Clone, Serialize)]
pub struct CipherVector {
    pub name: &'static str,
    pub key: u8,
    pub key_len: usize,
    pub session_id: u32,
    pub iv_suffix: u64,
    pub plaintext: &'static [u8],
    pub expected_ciphertext: &'static str,
    pub expected_tag: &'static str,
    /// Tag of a GMAC with `plaintext` as the authenticated data.
    pub expected_gmac: &'static str,
}

impl CipherVector {
    pub fn key(&self) -> Vec<u8> {
        vec![self.key; self.key_len]
    }

    pub fn iv(&self) -> Iv {
        CryptoHeader {
            transform_kind: TransformKind::None,
            key_id: 0,
            session_id: self.session_id,
            iv_suffix: self.iv_suffix,
        }
        .iv()
    }
}

pub fn key_exchange_vectors() -> Vec<KeyExchangeVector> {
    vec![KeyExchangeVector {
        name: "uniform challenges and secret",
        challenge1: 0x01,
        challenge2: 0x02,
        secret: 0x03,
        secret_len: 32,
        expected_salt: "dc724efa09341e7e6298ff75ac9fafc93923f7a5f333c5432a39a30d249769b9",
        expected_key: "6c2e8f7ec1c7683b2508e3acdaa9e81c2157674e3f0cd0ca6770484f1d47a120",
    }]
}

pub fn session_key_vectors() -> Vec<SessionKeyVector> {
    vec![
        SessionKeyVector {
            name: "AES128-GCM with receiver specific key",
            transform_kind: TransformKind::Aes128Gcm,
            salt: 0x11,
            sender_key: 0x22,
            receiver_key: Some(0x33),
            session_id: 7,
            expected_session_key: "7d8066a522aca2edafd30a69c41fb0dc",
            expected_receiver_key: Some("a6277d37027bf5dbdf89c02d06ba2f6d"),
        },
        SessionKeyVector {
            name: "AES256-GCM sender only",
            transform_kind: TransformKind::Aes256Gcm,
            salt: 0x11,
            sender_key: 0x22,
            receiver_key: None,
            session_id: 7,
            expected_session_key: "48639b121b7c662ce46bd9c542eb5dba66550c82b6181dba20caeb7dccec8c70",
            expected_receiver_key: None,
        },
    ]
}

pub fn cipher_vectors() -> Vec<CipherVector> {
    vec![
        CipherVector {
            name: "AES128",
            key: 0x44,
            key_len: 16,
            session_id: 7,
            iv_suffix: 1,
            plaintext: b"hello, dds!",
            expected_ciphertext: "6bc1bd0d20eb1c710df7c2",
            expected_tag: "10d23b5fb6075ed022dcdcd25a5b1983",
            expected_gmac: "f5b87ad4b29012fbf3ce69b7983b89d9",
        },
        CipherVector {
            name: "AES256",
            key: 0x44,
            key_len: 32,
            session_id: 7,
            iv_suffix: 1,
            plaintext: b"hello, dds!",
            expected_ciphertext: "73d3ea1bab5733c51ffa99",
            expected_tag: "a772346c284a1ed90ddd403b34309732",
            expected_gmac: "33a56a9866e5ba0f2b4abe36dccb7524",
        },
    ]
}

/// All vectors as one JSON document, for sharing with other implementations.
pub fn export_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&serde_json::json!({
        "key_exchange": key_exchange_vectors(),
        "session_keys": session_key_vectors(),
        "ciphers": cipher_vectors(),
    }))
}

//! Master key material and the key-exchange derivation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, Result};
use crate::types::TransformKind;

type HmacSha256 = Hmac<Sha256>;

/// Largest key (and salt) length supported by any transform kind.
pub const MAX_KEY_SIZE: usize = 32;

/// Length of each authentication challenge in a [`SharedSecret`].
pub const CHALLENGE_SIZE: usize = 32;

const KX_SALT_COOKIE: &[u8] = b"keyexchange salt";
const KX_KEY_COOKIE: &[u8] = b"key exchange key";

/// Factory-wide source of key ids.
///
/// Ids start at 1; zero is reserved for key-exchange material.
#[derive(Debug)]
pub struct KeyIdGenerator(AtomicU32);

impl KeyIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    /// Take the next id.
    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for KeyIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared secret produced by the authentication handshake.
pub struct SharedSecret {
    pub challenge1: [u8; CHALLENGE_SIZE],
    pub challenge2: [u8; CHALLENGE_SIZE],
    secret: Zeroizing<Vec<u8>>,
}

impl SharedSecret {
    pub fn new(
        challenge1: [u8; CHALLENGE_SIZE],
        challenge2: [u8; CHALLENGE_SIZE],
        secret: Vec<u8>,
    ) -> Self {
        Self {
            challenge1,
            challenge2,
            secret: Zeroizing::new(secret),
        }
    }

    /// The raw secret bytes.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("challenge1", &hex::encode(&self.challenge1[..4]))
            .field("challenge2", &hex::encode(&self.challenge2[..4]))
            .field("secret_len", &self.secret.len())
            .finish()
    }
}

/// Master key material of a participant or endpoint.
///
/// Salt and keys are stored in fixed buffers; only the first
/// `transform_kind.key_size()` bytes are meaningful.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKeyMaterial {
    #[zeroize(skip)]
    transform_kind: TransformKind,
    master_salt: [u8; MAX_KEY_SIZE],
    sender_key_id: u32,
    master_sender_key: [u8; MAX_KEY_SIZE],
    receiver_specific_key_id: u32,
    master_receiver_specific_key: [u8; MAX_KEY_SIZE],
}

impl MasterKeyMaterial {
    /// Material of kind `None`, carrying no keys.
    pub fn none() -> Self {
        Self {
            transform_kind: TransformKind::None,
            master_salt: [0; MAX_KEY_SIZE],
            sender_key_id: 0,
            master_sender_key: [0; MAX_KEY_SIZE],
            receiver_specific_key_id: 0,
            master_receiver_specific_key: [0; MAX_KEY_SIZE],
        }
    }

    /// Fresh random salt and sender key for `kind`.
    pub fn generate(kind: TransformKind, ids: &KeyIdGenerator) -> Self {
        let mut km = Self::none();
        km.transform_kind = kind;
        if kind == TransformKind::None {
            return km;
        }
        let size = kind.key_size();
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut km.master_salt[..size]);
        rng.fill_bytes(&mut km.master_sender_key[..size]);
        km.sender_key_id = ids.next_id();
        km
    }

    /// Add a random receiver-specific key, used for origin authentication.
    pub fn add_receiver_specific_key(&mut self, ids: &KeyIdGenerator) {
        let size = self.transform_kind.key_size();
        rand::thread_rng().fill_bytes(&mut self.master_receiver_specific_key[..size]);
        self.receiver_specific_key_id = ids.next_id();
    }

    /// Copy kind, salt and sender key; drop the receiver-specific part.
    pub fn copy_sender_part(&self) -> Self {
        let mut km = Self::none();
        km.transform_kind = self.transform_kind;
        km.master_salt = self.master_salt;
        km.sender_key_id = self.sender_key_id;
        km.master_sender_key = self.master_sender_key;
        km
    }

    /// Rebuild key material from its serialized fields.
    pub fn from_parts(
        transform_kind: TransformKind,
        salt: &[u8],
        sender_key_id: u32,
        sender_key: &[u8],
        receiver_specific_key_id: u32,
        receiver_specific_key: &[u8],
    ) -> Result<Self> {
        let size = transform_kind.key_size();
        if salt.len() != size || sender_key.len() != size {
            return Err(CryptoError::InvalidToken(format!(
                "key length mismatch for {transform_kind:?}"
            )));
        }
        if receiver_specific_key_id != 0 && receiver_specific_key.len() != size {
            return Err(CryptoError::InvalidToken(
                "receiver specific key length mismatch".into(),
            ));
        }
        let mut km = Self::none();
        km.transform_kind = transform_kind;
        km.master_salt[..size].copy_from_slice(salt);
        km.sender_key_id = sender_key_id;
        km.master_sender_key[..size].copy_from_slice(sender_key);
        km.receiver_specific_key_id = receiver_specific_key_id;
        if receiver_specific_key_id != 0 {
            km.master_receiver_specific_key[..size].copy_from_slice(receiver_specific_key);
        }
        Ok(km)
    }

    /// Derive the key-exchange material of a participant pair.
    ///
    /// Both sides hold the same shared secret and therefore derive the same
    /// AES256-GCM material with key id 0.
    pub fn key_exchange(shared: &SharedSecret) -> Result<Self> {
        if shared.secret().is_empty() {
            return Err(CryptoError::InvalidArgument("empty shared secret".into()));
        }
        let salt = kx_hmac(&shared.challenge1, KX_SALT_COOKIE, &shared.challenge2, shared.secret())?;
        let key = kx_hmac(&shared.challenge2, KX_KEY_COOKIE, &shared.challenge1, shared.secret())?;

        let mut km = Self::none();
        km.transform_kind = TransformKind::Aes256Gcm;
        km.master_salt.copy_from_slice(&salt);
        km.master_sender_key.copy_from_slice(&key);
        Ok(km)
    }

    pub fn transform_kind(&self) -> TransformKind {
        self.transform_kind
    }

    pub fn sender_key_id(&self) -> u32 {
        self.sender_key_id
    }

    pub fn receiver_specific_key_id(&self) -> u32 {
        self.receiver_specific_key_id
    }

    pub fn master_salt(&self) -> &[u8] {
        &self.master_salt[..self.transform_kind.key_size()]
    }

    pub fn master_sender_key(&self) -> &[u8] {
        &self.master_sender_key[..self.transform_kind.key_size()]
    }

    /// The receiver-specific key, if one is attached.
    pub fn master_receiver_specific_key(&self) -> Option<&[u8]> {
        if self.receiver_specific_key_id == 0 {
            None
        } else {
            Some(&self.master_receiver_specific_key[..self.transform_kind.key_size()])
        }
    }
}

impl fmt::Debug for MasterKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyMaterial")
            .field("transform_kind", &self.transform_kind)
            .field("sender_key_id", &self.sender_key_id)
            .field("receiver_specific_key_id", &self.receiver_specific_key_id)
            .finish_non_exhaustive()
    }
}

fn kx_hmac(first: &[u8], cookie: &[u8], second: &[u8], secret: &[u8]) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(cookie);
    hasher.update(second);
    let mac_key: Zeroizing<[u8; 32]> = Zeroizing::new(hasher.finalize().into());

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&mac_key[..])
        .map_err(|e| CryptoError::InvalidArgument(format!("hmac key: {e}")))?;
    mac.update(secret);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(secret: u8) -> SharedSecret {
        SharedSecret::new([1u8; 32], [2u8; 32], vec![secret; 32])
    }

    #[test]
    fn test_key_ids_start_at_one() {
        let ids = KeyIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_generate_sizes() {
        let ids = KeyIdGenerator::new();
        let km = MasterKeyMaterial::generate(TransformKind::Aes128Gcm, &ids);
        assert_eq!(km.master_salt().len(), 16);
        assert_eq!(km.master_sender_key().len(), 16);
        assert_eq!(km.sender_key_id(), 1);
        assert!(km.master_receiver_specific_key().is_none());

        let km = MasterKeyMaterial::generate(TransformKind::Aes256Gmac, &ids);
        assert_eq!(km.master_sender_key().len(), 32);
        assert_eq!(km.sender_key_id(), 2);
    }

    #[test]
    fn test_generate_none_has_no_keys() {
        let ids = KeyIdGenerator::new();
        let km = MasterKeyMaterial::generate(TransformKind::None, &ids);
        assert!(km.master_sender_key().is_empty());
        assert_eq!(km.sender_key_id(), 0);
    }

    #[test]
    fn test_copy_drops_receiver_part() {
        let ids = KeyIdGenerator::new();
        let mut km = MasterKeyMaterial::generate(TransformKind::Aes256Gcm, &ids);
        km.add_receiver_specific_key(&ids);
        assert_eq!(km.receiver_specific_key_id(), 2);

        let copy = km.copy_sender_part();
        assert_eq!(copy.master_sender_key(), km.master_sender_key());
        assert_eq!(copy.master_salt(), km.master_salt());
        assert_eq!(copy.sender_key_id(), km.sender_key_id());
        assert_eq!(copy.receiver_specific_key_id(), 0);
    }

    #[test]
    fn test_from_parts_rejects_length_mismatch() {
        let err = MasterKeyMaterial::from_parts(TransformKind::Aes256Gcm, &[1; 16], 1, &[1; 32], 0, &[]);
        assert!(matches!(err, Err(CryptoError::InvalidToken(_))));

        let err = MasterKeyMaterial::from_parts(TransformKind::Aes128Gcm, &[1; 16], 1, &[1; 16], 9, &[1; 8]);
        assert!(matches!(err, Err(CryptoError::InvalidToken(_))));
    }

    #[test]
    fn test_key_exchange_is_deterministic() {
        let a = MasterKeyMaterial::key_exchange(&shared(9)).unwrap();
        let b = MasterKeyMaterial::key_exchange(&shared(9)).unwrap();
        assert_eq!(a.master_salt(), b.master_salt());
        assert_eq!(a.master_sender_key(), b.master_sender_key());
        assert_eq!(a.transform_kind(), TransformKind::Aes256Gcm);
        assert_eq!(a.sender_key_id(), 0);

        let c = MasterKeyMaterial::key_exchange(&shared(8)).unwrap();
        assert_ne!(a.master_sender_key(), c.master_sender_key());
        assert_ne!(a.master_salt(), a.master_sender_key());
    }

    #[test]
    fn test_key_exchange_rejects_empty_secret() {
        let s = SharedSecret::new([0; 32], [0; 32], vec![]);
        assert!(MasterKeyMaterial::key_exchange(&s).is_err());
    }

    #[test]
    fn test_debug_hides_keys() {
        let ids = KeyIdGenerator::new();
        let km = MasterKeyMaterial::generate(TransformKind::Aes256Gcm, &ids);
        let dbg = format!("{:?}", km);
        assert!(!dbg.contains(&hex::encode(km.master_sender_key())));
    }
}

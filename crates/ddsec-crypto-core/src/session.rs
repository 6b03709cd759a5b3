//! Session keys derived from master key material.
//!
//! A session key protects a bounded number of cipher blocks. Once the budget
//! would be exceeded the session id is bumped and a new key derived from the
//! same master material, so a receiver can always recompute the key from the
//! session id carried in the crypto header.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::Iv;
use crate::error::{CryptoError, Result};
use crate::keys::{MasterKeyMaterial, MAX_KEY_SIZE};
use crate::types::TransformKind;
use crate::wire::CryptoHeader;

type HmacSha256 = Hmac<Sha256>;

const SESSION_KEY_COOKIE: &[u8] = b"SessionKey";
const SESSION_RECEIVER_KEY_COOKIE: &[u8] = b"SessionReceiverKey";

/// Cipher block size in bytes.
pub const BLOCK_SIZE: u64 = 16;

/// Block budget per session, by key size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum blocks protected by one AES-128 session key.
    pub max_blocks_aes128: u64,
    /// Maximum blocks protected by one AES-256 session key.
    pub max_blocks_aes256: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_blocks_aes128: 1 << 32,
            max_blocks_aes256: 1 << 36,
        }
    }
}

impl SessionConfig {
    /// Same budget for every key size.
    pub fn uniform(max_blocks: u64) -> Self {
        Self {
            max_blocks_aes128: max_blocks,
            max_blocks_aes256: max_blocks,
        }
    }

    pub fn max_blocks(&self, kind: TransformKind) -> u64 {
        match kind.key_size() {
            16 => self.max_blocks_aes128,
            _ => self.max_blocks_aes256,
        }
    }
}

/// Derived session key bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; MAX_KEY_SIZE],
    len: usize,
}

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({} bytes)", self.len)
    }
}

fn derive(cookie: &[u8], key: &[u8], salt: &[u8], session_id: u32, len: usize) -> Result<SessionKey> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidArgument(format!("hmac key: {e}")))?;
    mac.update(cookie);
    mac.update(salt);
    mac.update(&session_id.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let mut bytes = [0u8; MAX_KEY_SIZE];
    bytes[..len].copy_from_slice(&digest[..len]);
    Ok(SessionKey { bytes, len })
}

/// Session key for `session_id` under the master sender key.
pub fn derive_session_key(master: &MasterKeyMaterial, session_id: u32) -> Result<SessionKey> {
    let kind = master.transform_kind();
    if kind == TransformKind::None {
        return Err(CryptoError::Unsupported("session key for transform kind none".into()));
    }
    derive(
        SESSION_KEY_COOKIE,
        master.master_sender_key(),
        master.master_salt(),
        session_id,
        kind.key_size(),
    )
}

/// Receiver-specific session key for `session_id`.
///
/// `master` must carry a receiver-specific key; its salt is shared with the
/// sender key.
pub fn derive_receiver_key(master: &MasterKeyMaterial, session_id: u32) -> Result<SessionKey> {
    let kind = master.transform_kind();
    let key = master.master_receiver_specific_key().ok_or_else(|| {
        CryptoError::InvalidArgument("key material has no receiver specific key".into())
    })?;
    derive(
        SESSION_RECEIVER_KEY_COOKIE,
        key,
        master.master_salt(),
        session_id,
        kind.key_size(),
    )
}

/// Result of charging a message against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The current session had room.
    Continued,
    /// The budget ran out and a new session was derived.
    Rekeyed { previous: u32 },
}

/// Parameters for protecting one message, captured under the session lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub header: CryptoHeader,
    pub key: SessionKey,
}

impl SessionSnapshot {
    pub fn iv(&self) -> Iv {
        self.header.iv()
    }
}

/// An active session on the sending side.
pub struct SessionKeyMaterial {
    master: Arc<MasterKeyMaterial>,
    id: u32,
    key: SessionKey,
    iv_suffix: u64,
    block_counter: u64,
    max_blocks_per_session: u64,
}

impl SessionKeyMaterial {
    /// Start a session with a random id and IV suffix.
    pub fn new(master: Arc<MasterKeyMaterial>, config: &SessionConfig) -> Result<Self> {
        let mut rng = rand::thread_rng();
        Self::with_id(master, config, rng.gen(), rng.gen())
    }

    /// Start a session with a given id and IV suffix.
    pub fn with_id(
        master: Arc<MasterKeyMaterial>,
        config: &SessionConfig,
        id: u32,
        iv_suffix: u64,
    ) -> Result<Self> {
        let max_blocks_per_session = config.max_blocks(master.transform_kind());
        if max_blocks_per_session == 0 {
            return Err(CryptoError::InvalidArgument("zero session block budget".into()));
        }
        let key = derive_session_key(&master, id)?;
        Ok(Self {
            master,
            id,
            key,
            iv_suffix,
            block_counter: 0,
            max_blocks_per_session,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn master(&self) -> &Arc<MasterKeyMaterial> {
        &self.master
    }

    pub fn transform_kind(&self) -> TransformKind {
        self.master.transform_kind()
    }

    pub fn key_id(&self) -> u32 {
        self.master.sender_key_id()
    }

    pub fn block_counter(&self) -> u64 {
        self.block_counter
    }

    pub fn max_blocks_per_session(&self) -> u64 {
        self.max_blocks_per_session
    }

    /// Move the counter, e.g. to exercise rotation at the boundary.
    pub fn set_block_counter(&mut self, blocks: u64) {
        self.block_counter = blocks.min(self.max_blocks_per_session);
    }

    /// Charge `data_len` bytes against the block budget, rotating first
    /// when the budget would be exceeded.
    pub fn advance(&mut self, data_len: usize) -> Result<Advance> {
        let blocks = (data_len as u64).div_ceil(BLOCK_SIZE).max(1);
        if blocks > self.max_blocks_per_session {
            return Err(CryptoError::ResourceExhausted(format!(
                "message of {blocks} blocks exceeds session budget"
            )));
        }
        let mut outcome = Advance::Continued;
        if self.block_counter + blocks > self.max_blocks_per_session {
            let previous = self.id;
            self.id = self.id.wrapping_add(1);
            self.key = derive_session_key(&self.master, self.id)?;
            self.block_counter = 0;
            outcome = Advance::Rekeyed { previous };
        }
        self.block_counter += blocks;
        Ok(outcome)
    }

    /// Charge a message and take the header and key that protect it.
    pub fn prepare(&mut self, data_len: usize) -> Result<(SessionSnapshot, Advance)> {
        let advance = self.advance(data_len)?;
        self.iv_suffix = self.iv_suffix.wrapping_add(1);
        let snapshot = SessionSnapshot {
            header: CryptoHeader {
                transform_kind: self.transform_kind(),
                key_id: self.key_id(),
                session_id: self.id,
                iv_suffix: self.iv_suffix,
            },
            key: self.key.clone(),
        };
        Ok((snapshot, advance))
    }
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyMaterial")
            .field("id", &self.id)
            .field("key_id", &self.key_id())
            .field("block_counter", &self.block_counter)
            .field("max_blocks_per_session", &self.max_blocks_per_session)
            .finish_non_exhaustive()
    }
}

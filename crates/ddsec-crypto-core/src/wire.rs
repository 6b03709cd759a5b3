//! Bounds-checked wire primitives for the secure envelope.
//!
//! Every read is checked against the remaining buffer and fails closed with
//! `DecodeFailed`; nothing here reinterprets raw bytes as typed structs.
//!
//! ```text
//! submessage header : id(1) | flags(1) | length(2, endianness from flags bit 0)
//! crypto header     : transform kind(4) | key id(4) | session id(4) | iv suffix(8)
//! crypto footer     : common mac(16) | count(4) | count x (key id(4) | mac(16))
//! ```
//!
//! All crypto header and footer integers are big-endian.

use bytes::{BufMut, BytesMut};

use crate::cipher::{Iv, Mac, IV_SIZE, MAC_SIZE};
use crate::error::{CryptoError, Result};
use crate::types::TransformKind;

/// Submessage ids used by the secure envelope.
pub mod smid {
    /// INFO_SOURCE, used as the first submessage of a protected RTPS body.
    pub const INFO_SRC: u8 = 0x0c;
    pub const SEC_BODY: u8 = 0x30;
    pub const SEC_PREFIX: u8 = 0x31;
    pub const SEC_POSTFIX: u8 = 0x32;
    pub const SRTPS_PREFIX: u8 = 0x33;
    pub const SRTPS_POSTFIX: u8 = 0x34;
}

/// Flags bit: submessage length is little-endian.
pub const FLAG_LITTLE_ENDIAN: u8 = 0x01;

pub const SUBMESSAGE_HEADER_SIZE: usize = 4;
pub const CRYPTO_HEADER_SIZE: usize = 20;
pub const CRYPTO_FOOTER_MIN_SIZE: usize = MAC_SIZE + 4;
pub const RECEIVER_MAC_SIZE: usize = 4 + MAC_SIZE;

/// "RTPS" + version(2) + vendor(2) + guid prefix(12).
pub const RTPS_HEADER_SIZE: usize = 20;
pub const RTPS_MAGIC: &[u8; 4] = b"RTPS";

/// Submessage header + 4 reserved bytes + version, vendor and guid prefix.
pub const INFO_SRC_SIZE: usize = SUBMESSAGE_HEADER_SIZE + 4 + (RTPS_HEADER_SIZE - 4);

/// A cursor over an inbound byte buffer.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CryptoError::DecodeFailed);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.buf.get(self.pos).copied().ok_or(CryptoError::DecodeFailed)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }
}

/// RTPS submessage header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub id: u8,
    pub flags: u8,
    pub length: u16,
}

impl SubmessageHeader {
    /// A header with the little-endian flag set.
    pub fn new(id: u8, length: usize) -> Result<Self> {
        let length = u16::try_from(length).map_err(|_| {
            CryptoError::InvalidArgument(format!("submessage length {length} exceeds 65535"))
        })?;
        Ok(Self {
            id,
            flags: FLAG_LITTLE_ENDIAN,
            length,
        })
    }

    pub fn is_little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let id = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let raw: [u8; 2] = reader.read_array()?;
        let length = if flags & FLAG_LITTLE_ENDIAN != 0 {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        };
        Ok(Self { id, flags, length })
    }

    /// Peek the header without consuming it.
    pub fn peek(reader: &ByteReader<'_>) -> Result<Self> {
        Self::read(&mut reader.clone())
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.id);
        buf.put_u8(self.flags);
        if self.is_little_endian() {
            buf.put_u16_le(self.length);
        } else {
            buf.put_u16(self.length);
        }
    }

    /// Overwrite the length of a header already written at `offset`.
    pub fn patch_length(buf: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let length = u16::try_from(length).map_err(|_| {
            CryptoError::InvalidArgument(format!("submessage length {length} exceeds 65535"))
        })?;
        let flags = *buf.get(offset + 1).ok_or(CryptoError::DecodeFailed)?;
        let bytes = if flags & FLAG_LITTLE_ENDIAN != 0 {
            length.to_le_bytes()
        } else {
            length.to_be_bytes()
        };
        let dst = buf
            .get_mut(offset + 2..offset + 4)
            .ok_or(CryptoError::DecodeFailed)?;
        dst.copy_from_slice(&bytes);
        Ok(())
    }
}

/// The crypto header that follows a prefix submessage header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoHeader {
    pub transform_kind: TransformKind,
    pub key_id: u32,
    pub session_id: u32,
    pub iv_suffix: u64,
}

impl CryptoHeader {
    /// Read a header; an unknown transform kind is a decode failure.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let kind = reader.read_u32_be()?;
        let transform_kind = TransformKind::from_u32(kind).map_err(|_| CryptoError::DecodeFailed)?;
        Ok(Self {
            transform_kind,
            key_id: reader.read_u32_be()?,
            session_id: reader.read_u32_be()?,
            iv_suffix: reader.read_u64_be()?,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.transform_kind.as_u32());
        buf.put_u32(self.key_id);
        buf.put_u32(self.session_id);
        buf.put_u64(self.iv_suffix);
    }

    /// Session id followed by the IV suffix.
    pub fn iv(&self) -> Iv {
        let mut iv = [0u8; IV_SIZE];
        iv[..4].copy_from_slice(&self.session_id.to_be_bytes());
        iv[4..].copy_from_slice(&self.iv_suffix.to_be_bytes());
        iv
    }
}

/// One receiver-specific MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverMac {
    pub key_id: u32,
    pub mac: Mac,
}

/// The crypto footer that follows a postfix submessage header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFooter {
    pub common_mac: Mac,
    pub receiver_macs: Vec<ReceiverMac>,
}

impl CryptoFooter {
    pub fn new(common_mac: Mac) -> Self {
        Self {
            common_mac,
            receiver_macs: Vec::new(),
        }
    }

    /// Read a footer. The declared count must fit the remaining bytes.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let common_mac = reader.read_array()?;
        let count = reader.read_u32_be()? as usize;
        if count > reader.remaining() / RECEIVER_MAC_SIZE {
            return Err(CryptoError::DecodeFailed);
        }
        let mut receiver_macs = Vec::with_capacity(count);
        for _ in 0..count {
            receiver_macs.push(ReceiverMac {
                key_id: reader.read_u32_be()?,
                mac: reader.read_array()?,
            });
        }
        Ok(Self {
            common_mac,
            receiver_macs,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.common_mac);
        buf.put_u32(self.receiver_macs.len() as u32);
        for rm in &self.receiver_macs {
            buf.put_u32(rm.key_id);
            buf.put_slice(&rm.mac);
        }
    }

    pub fn encoded_len(&self) -> usize {
        CRYPTO_FOOTER_MIN_SIZE + self.receiver_macs.len() * RECEIVER_MAC_SIZE
    }
}

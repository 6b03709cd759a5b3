//! Crypto token model and key material serialization.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use ddsec_crypto_core::{
    ByteReader, CryptoError, MasterKeyMaterial, Property, Result, TransformKind,
};

/// Class id of every token produced by this plugin.
pub const CRYPTO_TOKEN_CLASS_ID: &str = "DDS:Crypto:AES_GCM_GMAC";

/// Name of the binary property holding serialized key material.
pub const CRYPTO_TOKEN_KEYMAT_PROPERTY: &str = "dds.cryp.keymat";

/// A named binary value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryProperty {
    pub name: String,
    pub value: Vec<u8>,
    pub propagate: bool,
}

impl fmt::Debug for BinaryProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values carry key material.
        f.debug_struct("BinaryProperty")
            .field("name", &self.name)
            .field("value_len", &self.value.len())
            .field("propagate", &self.propagate)
            .finish()
    }
}

/// Generic security data holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHolder {
    pub class_id: String,
    pub properties: Vec<Property>,
    pub binary_properties: Vec<BinaryProperty>,
}

/// Tokens are plain data holders.
pub type CryptoToken = DataHolder;

impl DataHolder {
    /// Wrap key material into a crypto token.
    pub fn from_key_material(key_material: &MasterKeyMaterial) -> Self {
        Self {
            class_id: CRYPTO_TOKEN_CLASS_ID.to_string(),
            properties: Vec::new(),
            binary_properties: vec![BinaryProperty {
                name: CRYPTO_TOKEN_KEYMAT_PROPERTY.to_string(),
                value: serialize_key_material(key_material),
                propagate: true,
            }],
        }
    }

    /// The serialized key material of a well-formed crypto token.
    pub fn key_material_bytes(&self) -> Option<&[u8]> {
        match self.binary_properties.as_slice() {
            [prop] if prop.name == CRYPTO_TOKEN_KEYMAT_PROPERTY && !prop.value.is_empty() => {
                Some(&prop.value)
            }
            _ => None,
        }
    }
}

/// Check the framing of every token: class id, one key material property,
/// non-empty value. An empty sequence fails.
pub fn check_crypto_tokens(tokens: &[CryptoToken]) -> Result<()> {
    if tokens.is_empty() {
        return Err(CryptoError::InvalidArgument("empty crypto token sequence".into()));
    }
    for (i, token) in tokens.iter().enumerate() {
        if token.class_id != CRYPTO_TOKEN_CLASS_ID {
            return Err(CryptoError::InvalidToken(format!(
                "token {i}: unexpected class id {:?}",
                token.class_id
            )));
        }
        if token.key_material_bytes().is_none() {
            return Err(CryptoError::InvalidToken(format!(
                "token {i}: expected a single non-empty {CRYPTO_TOKEN_KEYMAT_PROPERTY} property"
            )));
        }
    }
    Ok(())
}

/// Big-endian key material encoding carried in tokens.
pub fn serialize_key_material(km: &MasterKeyMaterial) -> Vec<u8> {
    let size = km.transform_kind().key_size();
    let receiver_key = km.master_receiver_specific_key();
    let mut buf = BytesMut::with_capacity(24 + 3 * size);

    buf.put_u32(km.transform_kind().as_u32());
    buf.put_u32(size as u32);
    buf.put_slice(km.master_salt());
    buf.put_u32(km.sender_key_id());
    buf.put_u32(size as u32);
    buf.put_slice(km.master_sender_key());
    buf.put_u32(km.receiver_specific_key_id());
    match receiver_key {
        Some(key) => {
            buf.put_u32(key.len() as u32);
            buf.put_slice(key);
        }
        None => buf.put_u32(0),
    }
    buf.to_vec()
}

fn read_octets<'a>(reader: &mut ByteReader<'a>) -> Result<&'a [u8]> {
    let len = reader.read_u32_be()? as usize;
    reader.read_bytes(len)
}

/// Parse serialized key material. Truncation, unknown kinds, lengths that
/// disagree with the kind and trailing bytes are all `InvalidToken`.
pub fn deserialize_key_material(bytes: &[u8]) -> Result<MasterKeyMaterial> {
    let malformed = |_| CryptoError::InvalidToken("malformed key material".into());

    let mut reader = ByteReader::new(bytes);
    let raw_kind = reader.read_u32_be().map_err(malformed)?;
    let kind = TransformKind::from_u32(raw_kind)
        .map_err(|_| CryptoError::InvalidToken(format!("unknown transform kind {raw_kind}")))?;
    let salt = read_octets(&mut reader).map_err(malformed)?;
    let sender_key_id = reader.read_u32_be().map_err(malformed)?;
    let sender_key = read_octets(&mut reader).map_err(malformed)?;
    let receiver_key_id = reader.read_u32_be().map_err(malformed)?;
    let receiver_key = read_octets(&mut reader).map_err(malformed)?;
    if !reader.is_empty() {
        return Err(CryptoError::InvalidToken(format!(
            "{} trailing bytes after key material",
            reader.remaining()
        )));
    }

    MasterKeyMaterial::from_parts(kind, salt, sender_key_id, sender_key, receiver_key_id, receiver_key)
}

/// Structural checks on received key material of a non-`None` kind.
pub(crate) fn check_key_material(km: &MasterKeyMaterial) -> Result<()> {
    let all_zero = |bytes: &[u8]| bytes.iter().all(|b| *b == 0);
    if all_zero(km.master_salt()) {
        return Err(CryptoError::InvalidToken("empty master salt".into()));
    }
    if all_zero(km.master_sender_key()) {
        return Err(CryptoError::InvalidToken("empty master sender key".into()));
    }
    if let Some(key) = km.master_receiver_specific_key() {
        if all_zero(key) {
            return Err(CryptoError::InvalidToken("empty receiver specific key".into()));
        }
    }
    Ok(())
}

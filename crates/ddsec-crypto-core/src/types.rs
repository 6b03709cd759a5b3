//! Strong type definitions for the crypto plugin.
//!
//! Handles, kinds and attributes are newtypes or closed enums so that a
//! reader handle can never be passed where a transform kind is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};

/// Participant property selecting the AES key size ("128" or "256").
pub const KEY_SIZE_PROPERTY: &str = "dds.sec.crypto.keysize";

/// Endpoint property carrying the builtin endpoint name.
pub const BUILTIN_ENDPOINT_NAME_PROPERTY: &str = "dds.sec.builtin_endpoint_name";

/// Name of the builtin volatile secure writer.
pub const VOLATILE_SECURE_WRITER_NAME: &str = "BuiltinParticipantVolatileMessageSecureWriter";

/// Name of the builtin volatile secure reader.
pub const VOLATILE_SECURE_READER_NAME: &str = "BuiltinParticipantVolatileMessageSecureReader";

/// An opaque, generation-checked handle for a registered crypto object.
///
/// The low 32 bits hold the slot index plus one, the high 32 bits the slot
/// generation. The zero value is the nil handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// The nil handle.
    pub const NIL: Self = Self(0);

    /// Build a handle from a slot index and a generation.
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Wrap a raw value received from a caller.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Whether this is the nil handle.
    pub const fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// Slot index, or `None` for the nil handle.
    pub const fn index(&self) -> Option<u32> {
        let low = (self.0 & 0xffff_ffff) as u32;
        if low == 0 {
            None
        } else {
            Some(low - 1)
        }
    }

    /// Slot generation.
    pub const fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Return `Err(InvalidHandle)` when nil.
    pub fn require(self, what: &str) -> Result<Self> {
        if self.is_nil() {
            Err(CryptoError::handle(format!("nil {what} handle")))
        } else {
            Ok(self)
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(idx) => write!(f, "Handle({}#{})", idx, self.generation()),
            None => write!(f, "Handle(nil)"),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// AES key size selected for a participant and its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySize {
    Aes128,
    Aes256,
}

impl KeySize {
    /// Resolve from the participant properties, falling back to `default`.
    pub fn from_properties(props: &PropertySet, default: KeySize) -> Self {
        match props.get(KEY_SIZE_PROPERTY) {
            Some("128") => KeySize::Aes128,
            Some(_) => KeySize::Aes256,
            None => default,
        }
    }

    /// Key length in bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            KeySize::Aes128 => 16,
            KeySize::Aes256 => 32,
        }
    }
}

/// Cipher and key size applied to a message, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TransformKind {
    None = 0,
    Aes128Gmac = 1,
    Aes128Gcm = 2,
    Aes256Gmac = 3,
    Aes256Gcm = 4,
}

impl TransformKind {
    /// Parse the wire value.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(TransformKind::None),
            1 => Ok(TransformKind::Aes128Gmac),
            2 => Ok(TransformKind::Aes128Gcm),
            3 => Ok(TransformKind::Aes256Gmac),
            4 => Ok(TransformKind::Aes256Gcm),
            other => Err(CryptoError::Unsupported(format!("transform kind {other}"))),
        }
    }

    /// The wire value.
    pub const fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Key (and salt) length in bytes. Zero for `None`.
    pub const fn key_size(&self) -> usize {
        match self {
            TransformKind::None => 0,
            TransformKind::Aes128Gmac | TransformKind::Aes128Gcm => 16,
            TransformKind::Aes256Gmac | TransformKind::Aes256Gcm => 32,
        }
    }

    /// GCM kinds encrypt the content.
    pub const fn is_encryption(&self) -> bool {
        matches!(self, TransformKind::Aes128Gcm | TransformKind::Aes256Gcm)
    }

    /// GMAC kinds only authenticate the content.
    pub const fn is_authentication(&self) -> bool {
        matches!(self, TransformKind::Aes128Gmac | TransformKind::Aes256Gmac)
    }

    const fn select(encrypt: bool, size: KeySize) -> Self {
        match (encrypt, size) {
            (true, KeySize::Aes128) => TransformKind::Aes128Gcm,
            (true, KeySize::Aes256) => TransformKind::Aes256Gcm,
            (false, KeySize::Aes128) => TransformKind::Aes128Gmac,
            (false, KeySize::Aes256) => TransformKind::Aes256Gmac,
        }
    }
}

/// Protection requested for RTPS messages and submessages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionKind {
    None,
    Sign,
    Encrypt,
    SignWithOriginAuthentication,
    EncryptWithOriginAuthentication,
}

impl ProtectionKind {
    fn from_flags(protected: bool, encrypted: bool, origin: bool) -> Self {
        match (protected, encrypted, origin) {
            (false, _, _) => ProtectionKind::None,
            (true, true, false) => ProtectionKind::Encrypt,
            (true, true, true) => ProtectionKind::EncryptWithOriginAuthentication,
            (true, false, false) => ProtectionKind::Sign,
            (true, false, true) => ProtectionKind::SignWithOriginAuthentication,
        }
    }

    /// RTPS protection of a participant.
    pub fn for_participant(attrs: &ParticipantSecurityAttributes) -> Self {
        Self::from_flags(
            attrs.is_rtps_protected,
            attrs.has_flag(ParticipantSecurityAttributes::IS_RTPS_ENCRYPTED),
            attrs.has_flag(ParticipantSecurityAttributes::IS_RTPS_ORIGIN_AUTHENTICATED),
        )
    }

    /// Submessage (metadata) protection of an endpoint.
    pub fn for_endpoint(attrs: &EndpointSecurityAttributes) -> Self {
        Self::from_flags(
            attrs.is_submessage_protected,
            attrs.has_flag(EndpointSecurityAttributes::IS_SUBMESSAGE_ENCRYPTED),
            attrs.has_flag(EndpointSecurityAttributes::IS_SUBMESSAGE_ORIGIN_AUTHENTICATED),
        )
    }

    pub const fn has_origin_authentication(&self) -> bool {
        matches!(
            self,
            ProtectionKind::SignWithOriginAuthentication
                | ProtectionKind::EncryptWithOriginAuthentication
        )
    }

    pub const fn is_encryption_expected(&self) -> bool {
        matches!(
            self,
            ProtectionKind::Encrypt | ProtectionKind::EncryptWithOriginAuthentication
        )
    }

    pub const fn is_authentication_expected(&self) -> bool {
        matches!(
            self,
            ProtectionKind::Sign | ProtectionKind::SignWithOriginAuthentication
        )
    }

    /// Transform kind used to protect traffic of this kind.
    pub const fn transform_kind(&self, size: KeySize) -> TransformKind {
        match self {
            ProtectionKind::None => TransformKind::None,
            ProtectionKind::Sign | ProtectionKind::SignWithOriginAuthentication => {
                TransformKind::select(false, size)
            }
            ProtectionKind::Encrypt | ProtectionKind::EncryptWithOriginAuthentication => {
                TransformKind::select(true, size)
            }
        }
    }

    /// Whether a received transform kind satisfies this protection.
    pub const fn accepts(&self, kind: TransformKind) -> bool {
        if self.is_encryption_expected() {
            kind.is_encryption()
        } else if self.is_authentication_expected() {
            kind.is_authentication()
        } else {
            false
        }
    }
}

/// Protection requested for serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicProtectionKind {
    None,
    Sign,
    Encrypt,
}

impl BasicProtectionKind {
    /// Payload protection of an endpoint.
    pub fn for_endpoint(attrs: &EndpointSecurityAttributes) -> Self {
        if !attrs.is_payload_protected {
            BasicProtectionKind::None
        } else if attrs.has_flag(EndpointSecurityAttributes::IS_PAYLOAD_ENCRYPTED) {
            BasicProtectionKind::Encrypt
        } else {
            BasicProtectionKind::Sign
        }
    }

    pub const fn transform_kind(&self, size: KeySize) -> TransformKind {
        match self {
            BasicProtectionKind::None => TransformKind::None,
            BasicProtectionKind::Sign => TransformKind::select(false, size),
            BasicProtectionKind::Encrypt => TransformKind::select(true, size),
        }
    }

    /// Whether a received transform kind satisfies this protection.
    pub const fn accepts(&self, kind: TransformKind) -> bool {
        match self {
            BasicProtectionKind::None => false,
            BasicProtectionKind::Sign => kind.is_authentication(),
            BasicProtectionKind::Encrypt => kind.is_encryption(),
        }
    }
}

/// Participant security attributes handed over by access control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSecurityAttributes {
    pub allow_unauthenticated_participants: bool,
    pub is_access_protected: bool,
    pub is_rtps_protected: bool,
    pub is_discovery_protected: bool,
    pub is_liveliness_protected: bool,
    /// Plugin-specific flags, see the associated constants.
    pub plugin_participant_attributes: u32,
}

impl ParticipantSecurityAttributes {
    pub const IS_RTPS_ENCRYPTED: u32 = 1 << 0;
    pub const IS_DISCOVERY_ENCRYPTED: u32 = 1 << 1;
    pub const IS_LIVELINESS_ENCRYPTED: u32 = 1 << 2;
    pub const IS_RTPS_ORIGIN_AUTHENTICATED: u32 = 1 << 3;
    pub const IS_DISCOVERY_ORIGIN_AUTHENTICATED: u32 = 1 << 4;
    pub const IS_LIVELINESS_ORIGIN_AUTHENTICATED: u32 = 1 << 5;
    pub const IS_VALID: u32 = 1 << 31;

    /// Attributes for an RTPS-protected participant.
    pub fn rtps(protection: ProtectionKind) -> Self {
        let mut mask = Self::IS_VALID;
        if protection.is_encryption_expected() {
            mask |= Self::IS_RTPS_ENCRYPTED;
        }
        if protection.has_origin_authentication() {
            mask |= Self::IS_RTPS_ORIGIN_AUTHENTICATED;
        }
        Self {
            is_rtps_protected: protection != ProtectionKind::None,
            plugin_participant_attributes: mask,
            ..Default::default()
        }
    }

    pub const fn has_flag(&self, flag: u32) -> bool {
        self.plugin_participant_attributes & flag != 0
    }
}

/// Endpoint security attributes handed over by access control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSecurityAttributes {
    pub is_read_protected: bool,
    pub is_write_protected: bool,
    pub is_discovery_protected: bool,
    pub is_liveliness_protected: bool,
    pub is_submessage_protected: bool,
    pub is_payload_protected: bool,
    pub is_key_protected: bool,
    /// Plugin-specific flags, see the associated constants.
    pub plugin_endpoint_attributes: u32,
}

impl EndpointSecurityAttributes {
    pub const IS_SUBMESSAGE_ENCRYPTED: u32 = 1 << 0;
    pub const IS_PAYLOAD_ENCRYPTED: u32 = 1 << 1;
    pub const IS_SUBMESSAGE_ORIGIN_AUTHENTICATED: u32 = 1 << 2;
    pub const IS_VALID: u32 = 1 << 31;

    /// Attributes for the given submessage and payload protection.
    pub fn protected(metadata: ProtectionKind, payload: BasicProtectionKind) -> Self {
        let mut mask = Self::IS_VALID;
        if metadata.is_encryption_expected() {
            mask |= Self::IS_SUBMESSAGE_ENCRYPTED;
        }
        if metadata.has_origin_authentication() {
            mask |= Self::IS_SUBMESSAGE_ORIGIN_AUTHENTICATED;
        }
        if payload == BasicProtectionKind::Encrypt {
            mask |= Self::IS_PAYLOAD_ENCRYPTED;
        }
        Self {
            is_submessage_protected: metadata != ProtectionKind::None,
            is_payload_protected: payload != BasicProtectionKind::None,
            plugin_endpoint_attributes: mask,
            ..Default::default()
        }
    }

    pub const fn has_flag(&self, flag: u32) -> bool {
        self.plugin_endpoint_attributes & flag != 0
    }
}

/// A name/value property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
    pub propagate: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            propagate: false,
        }
    }
}

/// An ordered property sequence with name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet(pub Vec<Property>);

impl PropertySet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a property, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(Property::new(name, value));
        self
    }

    /// Value of the first property with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// The builtin endpoint name, if any.
    pub fn builtin_endpoint_name(&self) -> Option<&str> {
        self.get(BUILTIN_ENDPOINT_NAME_PROPERTY)
    }
}

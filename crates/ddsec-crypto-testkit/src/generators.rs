//! Proptest generators for property-based testing.

use proptest::prelude::*;

use ddsec_crypto_core::{BasicProtectionKind, KeySize, ProtectionKind, TransformKind};

use crate::fixtures::{data_submessage, rtps_message};

/// Generate a transform kind other than `None`.
pub fn transform_kind() -> impl Strategy<Value = TransformKind> {
    prop_oneof![
        Just(TransformKind::Aes128Gmac),
        Just(TransformKind::Aes128Gcm),
        Just(TransformKind::Aes256Gmac),
        Just(TransformKind::Aes256Gcm),
    ]
}

/// Generate any RTPS or submessage protection kind.
pub fn protection_kind() -> impl Strategy<Value = ProtectionKind> {
    prop_oneof![
        Just(ProtectionKind::None),
        Just(ProtectionKind::Sign),
        Just(ProtectionKind::Encrypt),
        Just(ProtectionKind::SignWithOriginAuthentication),
        Just(ProtectionKind::EncryptWithOriginAuthentication),
    ]
}

/// Generate a protection kind that actually protects something.
pub fn active_protection_kind() -> impl Strategy<Value = ProtectionKind> {
    protection_kind().prop_filter("protected", |kind| *kind != ProtectionKind::None)
}

/// Generate a payload protection kind.
pub fn basic_protection_kind() -> impl Strategy<Value = BasicProtectionKind> {
    prop_oneof![
        Just(BasicProtectionKind::None),
        Just(BasicProtectionKind::Sign),
        Just(BasicProtectionKind::Encrypt),
    ]
}

pub fn key_size() -> impl Strategy<Value = KeySize> {
    prop_oneof![Just(KeySize::Aes128), Just(KeySize::Aes256)]
}

/// Generate a non-empty serialized payload, 4-byte aligned, up to `max_words` words.
pub fn payload(max_words: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<[u8; 4]>(), 1..=max_words.max(1))
        .prop_map(|words| words.concat())
}

/// Generate one DATA submessage with an aligned body.
pub fn submessage(max_words: usize) -> impl Strategy<Value = Vec<u8>> {
    payload(max_words).prop_map(|body| data_submessage(&body))
}

/// Generate an RTPS message with up to `max_submessages` DATA submessages.
pub fn message(max_submessages: usize) -> impl Strategy<Value = Vec<u8>> {
    (
        any::<[u8; 12]>(),
        prop::collection::vec(submessage(8), 1..=max_submessages.max(1)),
    )
        .prop_map(|(guid_prefix, submessages)| rtps_message(guid_prefix, &submessages.concat()))
}

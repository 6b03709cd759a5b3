//! The transform entry point, the cipher steps shared by every operation,
//! and the serialized payload transforms.

use std::sync::Arc;

use tracing::{debug, trace};

use ddsec_crypto_core::wire::{CRYPTO_FOOTER_MIN_SIZE, SUBMESSAGE_HEADER_SIZE};
use ddsec_crypto_core::{
    derive_receiver_key, derive_session_key, Advance, AesGcmCipher, BasicProtectionKind, ByteReader, Cipher,
    CryptoError, CryptoHeader, Handle, Mac, MasterKeyMaterial, ReceiverMac, Result,
    SubmessageHeader,
};
use ddsec_crypto_registry::{KeyFactory, LocalDatareader, LocalDatawriter, RemoteDatawriter, SharedSession};

use crate::envelope::{build_payload, split_payload, Content, Envelope, Protected};
use crate::error::Rejection;

pub(crate) type Decoded<T> = std::result::Result<T, Rejection>;

/// Size of a postfix submessage before any receiver MAC is added.
pub(crate) const BARE_POSTFIX_SIZE: usize = SUBMESSAGE_HEADER_SIZE + CRYPTO_FOOTER_MIN_SIZE;

/// Log why a message was dropped and collapse the reason.
pub(crate) fn rejected(operation: &'static str) -> impl Fn(Rejection) -> CryptoError {
    move |reason| {
        debug!(operation, %reason, "dropped secure message");
        CryptoError::DecodeFailed
    }
}

pub(crate) fn check_cursor(len: usize, cursor: usize) -> Result<()> {
    if len == 0 {
        return Err(CryptoError::InvalidArgument("empty receiver list".into()));
    }
    if cursor >= len {
        return Err(CryptoError::InvalidArgument(format!(
            "cursor {cursor} is past a receiver list of {len}"
        )));
    }
    Ok(())
}

/// Check that `data` is a sequence of whole submessages.
pub(crate) fn check_submessages(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(CryptoError::InvalidArgument("empty submessage".into()));
    }
    let mut reader = ByteReader::new(data);
    while !reader.is_empty() {
        let header = SubmessageHeader::read(&mut reader)
            .and_then(|h| reader.skip(h.length as usize).map(|_| h))
            .map_err(|_| CryptoError::InvalidArgument("submessage length exceeds buffer".into()))?;
        trace!(id = header.id, length = header.length, "plain submessage");
    }
    Ok(())
}

/// Check that `data` is exactly one submessage.
pub(crate) fn check_single_submessage(data: &[u8]) -> Result<()> {
    check_submessages(data)?;
    let header = SubmessageHeader::read(&mut ByteReader::new(data))?;
    if data.len() != SUBMESSAGE_HEADER_SIZE + header.length as usize {
        return Err(CryptoError::InvalidArgument(
            "expected exactly one submessage".into(),
        ));
    }
    Ok(())
}

pub(crate) fn not_an_envelope() -> CryptoError {
    CryptoError::InvalidArgument("encoded buffer is not a secure envelope".into())
}

/// Encodes and decodes secured payloads, submessages and RTPS messages
/// with the keys held by a [`KeyFactory`].
pub struct CryptoTransform {
    factory: Arc<KeyFactory>,
    cipher: Arc<dyn Cipher>,
}

impl CryptoTransform {
    /// A transform using AES-GCM / GMAC.
    pub fn new(factory: Arc<KeyFactory>) -> Self {
        Self::with_cipher(factory, Arc::new(AesGcmCipher::new()))
    }

    pub fn with_cipher(factory: Arc<KeyFactory>, cipher: Arc<dyn Cipher>) -> Self {
        Self { factory, cipher }
    }

    pub fn factory(&self) -> &Arc<KeyFactory> {
        &self.factory
    }

    /// Charge `plain` to the session and encrypt or sign it.
    ///
    /// The session lock is held only while the header and key are taken,
    /// so a rotation is never observed half done.
    pub(crate) fn protect(&self, session: &SharedSession, plain: &[u8]) -> Result<Protected> {
        let (snapshot, advance) = session.lock().prepare(plain.len())?;
        let header = snapshot.header;
        if let Advance::Rekeyed { previous } = advance {
            debug!(
                key_id = header.key_id,
                previous,
                session_id = header.session_id,
                "session key rotated"
            );
        }

        let key = snapshot.key.as_bytes();
        let iv = header.iv();
        let kind = header.transform_kind;
        let (content, common_mac) = if kind.is_encryption() {
            self.cipher.encrypt(key, &iv, &[], plain)?
        } else if kind.is_authentication() {
            (plain.to_vec(), self.cipher.mac(key, &iv, plain)?)
        } else {
            return Err(CryptoError::Unsupported(format!("cannot protect with {kind:?}")));
        };

        trace!(
            key_id = header.key_id,
            session_id = header.session_id,
            iv_suffix = header.iv_suffix,
            len = plain.len(),
            ?kind,
            "protected"
        );
        Ok(Protected {
            header,
            content,
            encrypted: kind.is_encryption(),
            common_mac,
        })
    }

    /// MAC over the common MAC with the receiver-specific key of `key_material`.
    pub(crate) fn receiver_mac(
        &self,
        key_material: &MasterKeyMaterial,
        header: &CryptoHeader,
        common_mac: &Mac,
    ) -> Result<ReceiverMac> {
        let key = derive_receiver_key(key_material, header.session_id)?;
        let mac = self.cipher.mac(key.as_bytes(), &header.iv(), common_mac)?;
        Ok(ReceiverMac {
            key_id: key_material.receiver_specific_key_id(),
            mac,
        })
    }

    /// Check the header against `key_material` and the expected protection,
    /// then decrypt or verify the content.
    pub(crate) fn unprotect(
        &self,
        key_material: &MasterKeyMaterial,
        expected: bool,
        envelope: &Envelope<'_>,
    ) -> Decoded<Vec<u8>> {
        let header = &envelope.header;
        let kind = header.transform_kind;
        if kind != key_material.transform_kind() || !expected {
            return Err(Rejection::UnexpectedKind(kind));
        }
        let key = derive_session_key(key_material, header.session_id).map_err(Rejection::Derivation)?;
        let iv = header.iv();
        let mac = &envelope.footer.common_mac;

        let plain = match (kind.is_encryption(), envelope.content) {
            (true, Content::Encrypted(ciphertext)) => self
                .cipher
                .decrypt(key.as_bytes(), &iv, &[], ciphertext, mac)
                .map_err(|_| Rejection::Authentication)?,
            (false, Content::Plain(data)) => {
                self.cipher
                    .verify_mac(key.as_bytes(), &iv, data, mac)
                    .map_err(|_| Rejection::Authentication)?;
                data.to_vec()
            }
            _ => return Err(Rejection::Malformed),
        };
        trace!(
            key_id = header.key_id,
            session_id = header.session_id,
            iv_suffix = header.iv_suffix,
            len = plain.len(),
            "unprotected"
        );
        Ok(plain)
    }

    /// Find the receiver MAC addressed to `local` and verify it.
    pub(crate) fn verify_receiver_mac(
        &self,
        remote_participant: Handle,
        local: Handle,
        envelope: &Envelope<'_>,
    ) -> Decoded<()> {
        for candidate in &envelope.footer.receiver_macs {
            let relation = match self.factory.find_specific_relation(remote_participant, candidate.key_id) {
                Ok(Some(relation)) if relation.local == local => relation,
                _ => continue,
            };
            let key = derive_receiver_key(&relation.key_material, envelope.header.session_id)
                .map_err(Rejection::Derivation)?;
            return self
                .cipher
                .verify_mac(
                    key.as_bytes(),
                    &envelope.header.iv(),
                    &envelope.footer.common_mac,
                    &candidate.mac,
                )
                .map_err(|_| Rejection::Authentication);
        }
        Err(Rejection::MissingReceiverMac)
    }

    /// Protect a serialized payload with the writer's payload key.
    ///
    /// A writer without payload protection gets its payload back unchanged.
    pub fn encode_serialized_payload(&self, plain: &[u8], writer: Handle) -> Result<Vec<u8>> {
        writer.require("local datawriter")?;
        if plain.is_empty() || plain.len() % 4 != 0 {
            return Err(CryptoError::InvalidArgument(format!(
                "payload of {} bytes is not 4-byte aligned",
                plain.len()
            )));
        }
        let local = self.factory.registry().find::<LocalDatawriter>(writer)?;
        let Some(session) = local.payload_session.as_ref() else {
            return Ok(plain.to_vec());
        };
        let protected = self.protect(session, plain)?;
        Ok(build_payload(&protected))
    }

    /// Recover a serialized payload sent by `remote_writer`.
    pub fn decode_serialized_payload(
        &self,
        encoded: &[u8],
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<u8>> {
        if encoded.is_empty() {
            return Err(CryptoError::InvalidArgument("empty encoded payload".into()));
        }
        let writer = self.matched_remote_writer(local_reader, remote_writer)?;
        if writer.payload_protection == BasicProtectionKind::None {
            return Ok(encoded.to_vec());
        }
        self.decode_payload(encoded, &writer)
            .map_err(rejected("decode_serialized_payload"))
    }

    fn decode_payload(&self, encoded: &[u8], writer: &RemoteDatawriter) -> Decoded<Vec<u8>> {
        let envelope = split_payload(encoded).map_err(|_| Rejection::Malformed)?;
        let key_id = envelope.header.key_id;
        let key_material = writer
            .writer_key_material_by_id(key_id)
            .ok_or(Rejection::UnknownKey(key_id))?;
        let expected = writer.payload_protection.accepts(envelope.header.transform_kind);
        self.unprotect(&key_material, expected, &envelope)
    }

    /// A remote writer matched to `local_reader`.
    pub(crate) fn matched_remote_writer(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Arc<RemoteDatawriter>> {
        local_reader.require("local datareader")?;
        remote_writer.require("remote datawriter")?;
        self.factory.registry().find::<LocalDatareader>(local_reader)?;
        let writer = self.factory.registry().find::<RemoteDatawriter>(remote_writer)?;
        if writer.local_reader != local_reader {
            return Err(CryptoError::InvalidArgument(format!(
                "{remote_writer} is not matched with {local_reader}"
            )));
        }
        Ok(writer)
    }
}

/// Offset of the postfix in a freshly built envelope.
pub(crate) fn bare_postfix_offset(encoded: &[u8]) -> usize {
    encoded.len() - BARE_POSTFIX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddsec_crypto_core::{
        EndpointSecurityAttributes, KeySize, ParticipantSecurityAttributes, ProtectionKind,
        PropertySet, SessionConfig, TransformKind,
    };
    use ddsec_crypto_registry::Registry;

    struct Writer {
        transform: CryptoTransform,
        writer: Handle,
    }

    fn local_writer(payload: BasicProtectionKind) -> Writer {
        let factory = Arc::new(KeyFactory::new(
            Arc::new(Registry::new()),
            SessionConfig::default(),
            KeySize::Aes128,
        ));
        let pattrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let pp = factory.register_local_participant(1, 1, &PropertySet::new(), &pattrs).unwrap();
        let attrs = EndpointSecurityAttributes::protected(ProtectionKind::None, payload);
        let writer = factory.register_local_datawriter(pp, &PropertySet::new(), &attrs).unwrap();
        Writer {
            transform: CryptoTransform::new(factory),
            writer,
        }
    }

    #[test]
    fn test_payload_must_be_aligned() {
        let w = local_writer(BasicProtectionKind::Encrypt);
        for len in [0usize, 1, 6] {
            assert!(matches!(
                w.transform.encode_serialized_payload(&vec![0; len], w.writer),
                Err(CryptoError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_unprotected_payload_passes_through() {
        let w = local_writer(BasicProtectionKind::None);
        let plain = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(w.transform.encode_serialized_payload(&plain, w.writer).unwrap(), plain);
    }

    #[test]
    fn test_encrypted_payload_hides_plaintext() {
        let w = local_writer(BasicProtectionKind::Encrypt);
        let plain = [0x5au8; 32];
        let encoded = w.transform.encode_serialized_payload(&plain, w.writer).unwrap();
        let envelope = split_payload(&encoded).unwrap();
        assert_eq!(envelope.header.transform_kind, TransformKind::Aes128Gcm);
        assert!(matches!(envelope.content, Content::Encrypted(ct) if ct != plain));
    }

    #[test]
    fn test_signed_payload_keeps_plaintext() {
        let w = local_writer(BasicProtectionKind::Sign);
        let plain = [0x5au8; 16];
        let encoded = w.transform.encode_serialized_payload(&plain, w.writer).unwrap();
        let envelope = split_payload(&encoded).unwrap();
        assert_eq!(envelope.header.transform_kind, TransformKind::Aes128Gmac);
        assert_eq!(envelope.content, Content::Plain(&plain));
    }

    #[test]
    fn test_iv_suffix_advances_per_message() {
        let w = local_writer(BasicProtectionKind::Sign);
        let a = w.transform.encode_serialized_payload(&[1; 4], w.writer).unwrap();
        let b = w.transform.encode_serialized_payload(&[1; 4], w.writer).unwrap();
        let ha = split_payload(&a).unwrap().header;
        let hb = split_payload(&b).unwrap().header;
        assert_eq!(ha.session_id, hb.session_id);
        assert_eq!(hb.iv_suffix, ha.iv_suffix.wrapping_add(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_payload_rejects_reader_handle() {
        let w = local_writer(BasicProtectionKind::Sign);
        assert!(matches!(
            w.transform.encode_serialized_payload(&[0; 4], Handle::NIL),
            Err(CryptoError::InvalidHandle(_))
        ));
        let pp = w
            .transform
            .factory()
            .registry()
            .find::<LocalDatawriter>(w.writer)
            .unwrap()
            .participant;
        assert!(matches!(
            w.transform.encode_serialized_payload(&[0; 4], pp),
            Err(CryptoError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_receiver_mac_depends_on_session() {
        let w = local_writer(BasicProtectionKind::Sign);
        let ids = ddsec_crypto_core::KeyIdGenerator::new();
        let mut km = MasterKeyMaterial::generate(TransformKind::Aes256Gmac, &ids);
        km.add_receiver_specific_key(&ids);
        let mut header = CryptoHeader {
            transform_kind: TransformKind::Aes256Gmac,
            key_id: km.sender_key_id(),
            session_id: 1,
            iv_suffix: 1,
        };
        let a = w.transform.receiver_mac(&km, &header, &[0; 16]).unwrap();
        header.session_id = 2;
        let b = w.transform.receiver_mac(&km, &header, &[0; 16]).unwrap();
        assert_eq!(a.key_id, km.receiver_specific_key_id());
        assert_ne!(a.mac, b.mac);
    }

    #[test]
    fn test_check_submessages() {
        assert!(check_submessages(&[0x15, 0x01, 4, 0, 1, 2, 3, 4]).is_ok());
        assert!(check_submessages(&[0x15, 0x01, 4, 0, 1, 2, 3, 4, 0x07, 0x01, 0, 0]).is_ok());
        assert!(check_submessages(&[0x15, 0x01, 5, 0, 1, 2, 3, 4]).is_err());
        assert!(check_submessages(&[0x15, 0x01]).is_err());
        assert!(check_submessages(&[]).is_err());
    }

    #[test]
    fn test_check_single_submessage() {
        assert!(check_single_submessage(&[0x15, 0x01, 4, 0, 1, 2, 3, 4]).is_ok());
        assert!(check_single_submessage(&[0x15, 0x01, 4, 0, 1, 2, 3, 4, 0x07, 0x01, 0, 0]).is_err());
    }

    #[test]
    fn test_cursor_bounds() {
        assert!(check_cursor(0, 0).is_err());
        assert!(check_cursor(2, 1).is_ok());
        assert!(check_cursor(2, 2).is_err());
    }
}

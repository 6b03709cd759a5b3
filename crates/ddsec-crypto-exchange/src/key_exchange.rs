//! The key exchange API.

use std::sync::Arc;

use tracing::{debug, warn};

use ddsec_crypto_core::{CryptoError, Handle, MasterKeyMaterial, ProtectionKind, Result, TransformKind};
use ddsec_crypto_registry::KeyFactory;

use crate::tokens::{check_crypto_tokens, check_key_material, deserialize_key_material, CryptoToken};

/// Builds tokens from local key material and installs key material
/// received from remotes.
pub struct KeyExchange {
    factory: Arc<KeyFactory>,
}

impl KeyExchange {
    pub fn new(factory: Arc<KeyFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<KeyFactory> {
        &self.factory
    }

    /// Tokens carrying the local participant's key material to `remote`.
    pub fn create_local_participant_crypto_tokens(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<Vec<CryptoToken>> {
        local_participant.require("local participant")?;
        remote_participant.require("remote participant")?;
        let km = self
            .factory
            .participant_key_material(local_participant, remote_participant)?;
        debug!(
            local = %local_participant,
            remote = %remote_participant,
            key_id = km.sender_key_id(),
            "created participant crypto tokens"
        );
        Ok(vec![CryptoToken::from_key_material(&km)])
    }

    pub fn set_remote_participant_crypto_tokens(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        local_participant.require("local participant")?;
        remote_participant.require("remote participant")?;
        let Some(mut received) = self.receive(remote_participant, tokens, 1)? else {
            return Ok(());
        };
        let km = received.remove(0);
        self.factory
            .set_participant_key_material(local_participant, remote_participant, km)
    }

    /// Tokens carrying a local writer's message and payload keys to a
    /// matched remote reader. Empty for the volatile secure writer and for
    /// unprotected writers.
    pub fn create_local_datawriter_crypto_tokens(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
    ) -> Result<Vec<CryptoToken>> {
        local_writer.require("local datawriter")?;
        remote_reader.require("remote datareader")?;
        let kms = self.factory.datawriter_key_material(local_writer, remote_reader)?;
        debug!(%local_writer, %remote_reader, count = kms.len(), "created datawriter crypto tokens");
        Ok(kms.iter().map(|km| CryptoToken::from_key_material(km)).collect())
    }

    pub fn set_remote_datawriter_crypto_tokens(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        local_reader.require("local datareader")?;
        remote_writer.require("remote datawriter")?;
        let Some(received) = self.receive(remote_writer, tokens, 2)? else {
            return Ok(());
        };
        self.factory
            .set_datawriter_key_material(local_reader, remote_writer, received)
    }

    /// Token carrying a local reader's key to a matched remote writer.
    /// Empty when the reader has no key material of its own.
    pub fn create_local_datareader_crypto_tokens(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<CryptoToken>> {
        local_reader.require("local datareader")?;
        remote_writer.require("remote datawriter")?;
        let km = self.factory.datareader_key_material(local_reader, remote_writer)?;
        debug!(%local_reader, %remote_writer, present = km.is_some(), "created datareader crypto tokens");
        Ok(km.iter().map(|km| CryptoToken::from_key_material(km)).collect())
    }

    pub fn set_remote_datareader_crypto_tokens(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        local_writer.require("local datawriter")?;
        remote_reader.require("remote datareader")?;
        let Some(mut received) = self.receive(remote_reader, tokens, 1)? else {
            return Ok(());
        };
        let km = received.remove(0);
        self.factory
            .set_datareader_key_material(local_writer, remote_reader, km)
    }

    /// Release tokens handed out by a `create_*` call.
    pub fn return_crypto_tokens(&self, tokens: Vec<CryptoToken>) -> Result<()> {
        check_crypto_tokens(&tokens)?;
        drop(tokens);
        Ok(())
    }

    /// Validate and decode received tokens. `Ok(None)` means an empty
    /// sequence that the remote's protection kind allows.
    fn receive(
        &self,
        remote: Handle,
        tokens: &[CryptoToken],
        max_tokens: usize,
    ) -> Result<Option<Vec<MasterKeyMaterial>>> {
        let protection = self.factory.get_protection_kind(remote)?;
        if tokens.is_empty() && protection == ProtectionKind::None {
            return Ok(None);
        }
        check_crypto_tokens(tokens).map_err(|e| {
            warn!(%remote, error = %e, "rejected crypto tokens");
            e
        })?;
        if tokens.len() > max_tokens {
            warn!(%remote, count = tokens.len(), max_tokens, "too many crypto tokens");
            return Err(CryptoError::InvalidArgument(format!(
                "expected at most {max_tokens} crypto tokens, got {}",
                tokens.len()
            )));
        }

        let mut received = Vec::with_capacity(tokens.len());
        for token in tokens {
            let bytes = token
                .key_material_bytes()
                .ok_or_else(|| CryptoError::InvalidToken("missing key material".into()))?;
            let km = deserialize_key_material(bytes)
                .and_then(|km| accept_key_material(km, protection))
                .map_err(|e| {
                    warn!(%remote, error = %e, "rejected crypto token key material");
                    e
                })?;
            received.push(km);
        }
        Ok(Some(received))
    }
}

fn accept_key_material(km: MasterKeyMaterial, protection: ProtectionKind) -> Result<MasterKeyMaterial> {
    if km.transform_kind() == TransformKind::None {
        if protection != ProtectionKind::None {
            return Err(CryptoError::InvalidToken(format!(
                "key material without transform for {protection:?} protection"
            )));
        }
        return Ok(km);
    }
    check_key_material(&km)?;
    Ok(km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{DataHolder, CRYPTO_TOKEN_CLASS_ID};
    use ddsec_crypto_core::{
        BasicProtectionKind, EndpointSecurityAttributes, KeySize, ParticipantSecurityAttributes,
        PropertySet, SessionConfig, SharedSecret,
    };
    use ddsec_crypto_registry::{RemoteParticipant, Registry};

    struct Peer {
        kx: KeyExchange,
        local: Handle,
        remote: Handle,
    }

    fn peer(identity: u64, other: u64, protection: ProtectionKind) -> Peer {
        let factory = Arc::new(KeyFactory::new(
            Arc::new(Registry::new()),
            SessionConfig::default(),
            KeySize::Aes256,
        ));
        let attrs = ParticipantSecurityAttributes::rtps(protection);
        let local = factory
            .register_local_participant(identity, identity, &PropertySet::new(), &attrs)
            .unwrap();
        let secret = SharedSecret::new([7; 32], [8; 32], vec![9; 32]);
        let remote = factory
            .register_matched_remote_participant(local, other, other, &secret)
            .unwrap();
        Peer { kx: KeyExchange::new(factory), local, remote }
    }

    #[test]
    fn test_participant_tokens_install() {
        let a = peer(1, 2, ProtectionKind::EncryptWithOriginAuthentication);
        let b = peer(2, 1, ProtectionKind::EncryptWithOriginAuthentication);

        let tokens = a.kx.create_local_participant_crypto_tokens(a.local, a.remote).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].class_id, CRYPTO_TOKEN_CLASS_ID);
        b.kx.set_remote_participant_crypto_tokens(b.local, b.remote, &tokens).unwrap();

        let rp = b.kx.factory().registry().find::<RemoteParticipant>(b.remote).unwrap();
        let installed = rp.pair(b.local).unwrap().remote_key_material().unwrap();
        assert_eq!(installed.transform_kind(), TransformKind::Aes256Gcm);
        assert_ne!(installed.receiver_specific_key_id(), 0);

        a.kx.return_crypto_tokens(tokens).unwrap();
    }

    #[test]
    fn test_nil_handles_rejected() {
        let a = peer(1, 2, ProtectionKind::Sign);
        assert!(matches!(
            a.kx.create_local_participant_crypto_tokens(Handle::NIL, a.remote),
            Err(CryptoError::InvalidArgument(_)) | Err(CryptoError::InvalidHandle(_))
        ));
        assert!(a
            .kx
            .set_remote_participant_crypto_tokens(a.local, Handle::NIL, &[])
            .is_err());
    }

    #[test]
    fn test_empty_tokens_need_unprotected_remote() {
        let a = peer(1, 2, ProtectionKind::Sign);
        assert!(a
            .kx
            .set_remote_participant_crypto_tokens(a.local, a.remote, &[])
            .is_err());

        let n = peer(1, 2, ProtectionKind::None);
        n.kx.set_remote_participant_crypto_tokens(n.local, n.remote, &[]).unwrap();
    }

    #[test]
    fn test_none_key_material_needs_unprotected_remote() {
        let a = peer(1, 2, ProtectionKind::Sign);
        let none = DataHolder::from_key_material(&MasterKeyMaterial::none());
        assert!(matches!(
            a.kx.set_remote_participant_crypto_tokens(a.local, a.remote, &[none.clone()]),
            Err(CryptoError::InvalidToken(_))
        ));

        let n = peer(1, 2, ProtectionKind::None);
        n.kx.set_remote_participant_crypto_tokens(n.local, n.remote, &[none]).unwrap();
    }

    #[test]
    fn test_too_many_participant_tokens() {
        let a = peer(1, 2, ProtectionKind::Sign);
        let b = peer(2, 1, ProtectionKind::Sign);
        let mut tokens = a.kx.create_local_participant_crypto_tokens(a.local, a.remote).unwrap();
        tokens.push(tokens[0].clone());
        assert!(matches!(
            b.kx.set_remote_participant_crypto_tokens(b.local, b.remote, &tokens),
            Err(CryptoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let a = peer(1, 2, ProtectionKind::Sign);
        let b = peer(2, 1, ProtectionKind::Sign);
        let mut tokens = a.kx.create_local_participant_crypto_tokens(a.local, a.remote).unwrap();
        tokens[0].binary_properties[0].value.truncate(10);
        assert!(matches!(
            b.kx.set_remote_participant_crypto_tokens(b.local, b.remote, &tokens),
            Err(CryptoError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_datawriter_and_datareader_tokens() {
        let a = peer(1, 2, ProtectionKind::Sign);
        let b = peer(2, 1, ProtectionKind::Sign);
        let attrs = EndpointSecurityAttributes::protected(ProtectionKind::Encrypt, BasicProtectionKind::Sign);
        let fa = a.kx.factory();
        let fb = b.kx.factory();

        let lw = fa.register_local_datawriter(a.local, &PropertySet::new(), &attrs).unwrap();
        let rr = fa.register_matched_remote_datareader(lw, a.remote).unwrap();
        let lr = fb.register_local_datareader(b.local, &PropertySet::new(), &attrs).unwrap();
        let rw = fb.register_matched_remote_datawriter(lr, b.remote).unwrap();

        let writer_tokens = a.kx.create_local_datawriter_crypto_tokens(lw, rr).unwrap();
        assert_eq!(writer_tokens.len(), 2);
        b.kx.set_remote_datawriter_crypto_tokens(lr, rw, &writer_tokens).unwrap();

        let reader_tokens = b.kx.create_local_datareader_crypto_tokens(lr, rw).unwrap();
        assert_eq!(reader_tokens.len(), 1);
        a.kx.set_remote_datareader_crypto_tokens(lw, rr, &reader_tokens).unwrap();

        a.kx.return_crypto_tokens(writer_tokens).unwrap();
        b.kx.return_crypto_tokens(reader_tokens).unwrap();
    }

    #[test]
    fn test_return_rejects_foreign_tokens() {
        let a = peer(1, 2, ProtectionKind::Sign);
        assert!(a.kx.return_crypto_tokens(vec![DataHolder::default()]).is_err());
        assert!(a.kx.return_crypto_tokens(Vec::new()).is_err());
    }
}

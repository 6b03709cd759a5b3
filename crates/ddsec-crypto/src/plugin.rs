//! The plugin: one registry shared by key factory, key exchange and
//! transforms.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use ddsec_crypto_core::{
    EndpointSecurityAttributes, Handle, KeySize, ParticipantSecurityAttributes, ProtectionKind,
    PropertySet, SessionConfig, SharedSecret,
};
use ddsec_crypto_exchange::{CryptoToken, KeyExchange};
use ddsec_crypto_registry::{KeyFactory, Registry};
use ddsec_crypto_transform::{CryptoTransform, SubmessageRoute};

use crate::error::Result;

/// Configuration for the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Session block budgets.
    pub session: SessionConfig,
    /// Key size for participants that do not set `dds.sec.crypto.keysize`.
    pub default_key_size: KeySize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            default_key_size: KeySize::Aes256,
        }
    }
}

/// The builtin cryptographic plugin.
///
/// Every entry point reports failures as a
/// [`SecurityException`](crate::SecurityException). A decode that fails
/// with `DecodeFailed` means "drop the message".
pub struct CryptoPlugin {
    config: CryptoConfig,
    factory: Arc<KeyFactory>,
    exchange: KeyExchange,
    transform: CryptoTransform,
}

impl CryptoPlugin {
    pub fn new(config: CryptoConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let factory = Arc::new(KeyFactory::new(registry, config.session, config.default_key_size));
        info!(default_key_size = ?config.default_key_size, "crypto plugin created");
        Self {
            config,
            exchange: KeyExchange::new(Arc::clone(&factory)),
            transform: CryptoTransform::new(Arc::clone(&factory)),
            factory,
        }
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.factory.registry()
    }

    pub fn key_factory(&self) -> &Arc<KeyFactory> {
        &self.factory
    }

    pub fn key_exchange(&self) -> &KeyExchange {
        &self.exchange
    }

    pub fn transform(&self) -> &CryptoTransform {
        &self.transform
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_local_participant(
        &self,
        identity_handle: u64,
        permissions_handle: u64,
        properties: &PropertySet,
        attributes: &ParticipantSecurityAttributes,
    ) -> Result<Handle> {
        Ok(self
            .factory
            .register_local_participant(identity_handle, permissions_handle, properties, attributes)?)
    }

    pub fn register_matched_remote_participant(
        &self,
        local_participant: Handle,
        remote_identity_handle: u64,
        remote_permissions_handle: u64,
        shared_secret: &SharedSecret,
    ) -> Result<Handle> {
        Ok(self.factory.register_matched_remote_participant(
            local_participant,
            remote_identity_handle,
            remote_permissions_handle,
            shared_secret,
        )?)
    }

    pub fn register_local_datawriter(
        &self,
        participant: Handle,
        properties: &PropertySet,
        attributes: &EndpointSecurityAttributes,
    ) -> Result<Handle> {
        Ok(self
            .factory
            .register_local_datawriter(participant, properties, attributes)?)
    }

    pub fn register_matched_remote_datareader(
        &self,
        local_writer: Handle,
        remote_participant: Handle,
    ) -> Result<Handle> {
        Ok(self
            .factory
            .register_matched_remote_datareader(local_writer, remote_participant)?)
    }

    pub fn register_local_datareader(
        &self,
        participant: Handle,
        properties: &PropertySet,
        attributes: &EndpointSecurityAttributes,
    ) -> Result<Handle> {
        Ok(self
            .factory
            .register_local_datareader(participant, properties, attributes)?)
    }

    pub fn register_matched_remote_datawriter(
        &self,
        local_reader: Handle,
        remote_participant: Handle,
    ) -> Result<Handle> {
        Ok(self
            .factory
            .register_matched_remote_datawriter(local_reader, remote_participant)?)
    }

    pub fn unregister_participant(&self, handle: Handle) -> Result<()> {
        Ok(self.factory.unregister_participant(handle)?)
    }

    pub fn unregister_datawriter(&self, handle: Handle) -> Result<()> {
        Ok(self.factory.unregister_datawriter(handle)?)
    }

    pub fn unregister_datareader(&self, handle: Handle) -> Result<()> {
        Ok(self.factory.unregister_datareader(handle)?)
    }

    pub fn get_protection_kind(&self, handle: Handle) -> Result<ProtectionKind> {
        Ok(self.factory.get_protection_kind(handle)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key exchange
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_local_participant_crypto_tokens(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<Vec<CryptoToken>> {
        Ok(self
            .exchange
            .create_local_participant_crypto_tokens(local_participant, remote_participant)?)
    }

    pub fn set_remote_participant_crypto_tokens(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        Ok(self
            .exchange
            .set_remote_participant_crypto_tokens(local_participant, remote_participant, tokens)?)
    }

    pub fn create_local_datawriter_crypto_tokens(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
    ) -> Result<Vec<CryptoToken>> {
        Ok(self
            .exchange
            .create_local_datawriter_crypto_tokens(local_writer, remote_reader)?)
    }

    pub fn set_remote_datawriter_crypto_tokens(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        Ok(self
            .exchange
            .set_remote_datawriter_crypto_tokens(local_reader, remote_writer, tokens)?)
    }

    pub fn create_local_datareader_crypto_tokens(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<CryptoToken>> {
        Ok(self
            .exchange
            .create_local_datareader_crypto_tokens(local_reader, remote_writer)?)
    }

    pub fn set_remote_datareader_crypto_tokens(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
        tokens: &[CryptoToken],
    ) -> Result<()> {
        Ok(self
            .exchange
            .set_remote_datareader_crypto_tokens(local_writer, remote_reader, tokens)?)
    }

    pub fn return_crypto_tokens(&self, tokens: Vec<CryptoToken>) -> Result<()> {
        Ok(self.exchange.return_crypto_tokens(tokens)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transforms
    // ─────────────────────────────────────────────────────────────────────────

    pub fn encode_serialized_payload(&self, plain: &[u8], writer: Handle) -> Result<Vec<u8>> {
        Ok(self.transform.encode_serialized_payload(plain, writer)?)
    }

    pub fn encode_datawriter_submessage(
        &self,
        encoded: &mut Vec<u8>,
        plain: &[u8],
        writer: Handle,
        readers: &[Handle],
        cursor: &mut usize,
    ) -> Result<()> {
        Ok(self
            .transform
            .encode_datawriter_submessage(encoded, plain, writer, readers, cursor)?)
    }

    pub fn encode_datareader_submessage(
        &self,
        plain: &[u8],
        reader: Handle,
        writers: &[Handle],
    ) -> Result<Vec<u8>> {
        Ok(self.transform.encode_datareader_submessage(plain, reader, writers)?)
    }

    pub fn encode_rtps_message(
        &self,
        encoded: &mut Vec<u8>,
        plain: &[u8],
        local_participant: Handle,
        remotes: &[Handle],
        cursor: &mut usize,
    ) -> Result<()> {
        Ok(self
            .transform
            .encode_rtps_message(encoded, plain, local_participant, remotes, cursor)?)
    }

    pub fn decode_rtps_message(
        &self,
        encoded: &[u8],
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<Vec<u8>> {
        Ok(self
            .transform
            .decode_rtps_message(encoded, local_participant, remote_participant)?)
    }

    pub fn preprocess_secure_submsg(
        &self,
        encoded: &[u8],
        local_participant: Handle,
        remote_participant: Handle,
    ) -> Result<SubmessageRoute> {
        Ok(self
            .transform
            .preprocess_secure_submsg(encoded, local_participant, remote_participant)?)
    }

    pub fn decode_datawriter_submessage(
        &self,
        encoded: &[u8],
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<u8>> {
        Ok(self
            .transform
            .decode_datawriter_submessage(encoded, local_reader, remote_writer)?)
    }

    pub fn decode_datareader_submessage(
        &self,
        encoded: &[u8],
        local_writer: Handle,
        remote_reader: Handle,
    ) -> Result<Vec<u8>> {
        Ok(self
            .transform
            .decode_datareader_submessage(encoded, local_writer, remote_reader)?)
    }

    pub fn decode_serialized_payload(
        &self,
        encoded: &[u8],
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Vec<u8>> {
        Ok(self
            .transform
            .decode_serialized_payload(encoded, local_reader, remote_writer)?)
    }
}

impl Default for CryptoPlugin {
    fn default() -> Self {
        Self::new(CryptoConfig::default())
    }
}

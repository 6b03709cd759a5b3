//! Datawriter and datareader registration and matching.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use ddsec_crypto_core::types::{VOLATILE_SECURE_READER_NAME, VOLATILE_SECURE_WRITER_NAME};
use ddsec_crypto_core::{
    BasicProtectionKind, CryptoError, EndpointSecurityAttributes, Handle, ProtectionKind,
    PropertySet, Result,
};

use crate::factory::KeyFactory;
use crate::objects::{
    LocalDatareader, LocalDatawriter, LocalParticipant, ParticipantKeyMaterial, RemoteDatareader,
    RemoteDatawriter, RemoteParticipant,
};
use crate::relations::{KeyRelation, SecureSubmessageCategory};

impl KeyFactory {
    /// Register a local datawriter of `participant`.
    ///
    /// The builtin volatile secure writer gets no key material; every other
    /// writer gets a message key when its submessages are protected and a
    /// payload key when its payload is.
    pub fn register_local_datawriter(
        &self,
        participant: Handle,
        properties: &PropertySet,
        attributes: &EndpointSecurityAttributes,
    ) -> Result<Handle> {
        let lp = self.registry().find::<LocalParticipant>(participant)?;
        let is_builtin_volatile = properties.builtin_endpoint_name() == Some(VOLATILE_SECURE_WRITER_NAME);
        let metadata_protection = ProtectionKind::for_endpoint(attributes);
        let payload_protection = BasicProtectionKind::for_endpoint(attributes);

        let mut writer = LocalDatawriter {
            participant,
            metadata_protection,
            payload_protection,
            is_builtin_volatile,
            message_key_material: None,
            message_session: None,
            payload_key_material: None,
            payload_session: None,
        };
        if !is_builtin_volatile {
            if metadata_protection != ProtectionKind::None {
                let km = self.generate_key(metadata_protection.transform_kind(lp.key_size));
                writer.message_session = Some(self.new_session(&km)?);
                writer.message_key_material = Some(km);
            }
            if payload_protection != BasicProtectionKind::None {
                let km = self.generate_key(payload_protection.transform_kind(lp.key_size));
                writer.payload_session = Some(self.new_session(&km)?);
                writer.payload_key_material = Some(km);
            }
        }

        let handle = self.registry().insert(Arc::new(writer))?;
        info!(
            %handle,
            %participant,
            ?metadata_protection,
            ?payload_protection,
            is_builtin_volatile,
            "registered local datawriter"
        );
        Ok(handle)
    }

    /// Register a local datareader of `participant`.
    pub fn register_local_datareader(
        &self,
        participant: Handle,
        properties: &PropertySet,
        attributes: &EndpointSecurityAttributes,
    ) -> Result<Handle> {
        let lp = self.registry().find::<LocalParticipant>(participant)?;
        let is_builtin_volatile = properties.builtin_endpoint_name() == Some(VOLATILE_SECURE_READER_NAME);
        let metadata_protection = ProtectionKind::for_endpoint(attributes);
        let payload_protection = BasicProtectionKind::for_endpoint(attributes);

        let mut reader = LocalDatareader {
            participant,
            metadata_protection,
            payload_protection,
            is_builtin_volatile,
            reader_key_material: None,
            reader_session: None,
        };
        if !is_builtin_volatile && metadata_protection != ProtectionKind::None {
            let km = self.generate_key(metadata_protection.transform_kind(lp.key_size));
            reader.reader_session = Some(self.new_session(&km)?);
            reader.reader_key_material = Some(km);
        }

        let handle = self.registry().insert(Arc::new(reader))?;
        if is_builtin_volatile {
            lp.state.lock().builtin_reader = handle;
        }
        info!(
            %handle,
            %participant,
            ?metadata_protection,
            is_builtin_volatile,
            "registered local datareader"
        );
        Ok(handle)
    }

    fn pair_of(&self, local_participant: Handle, remote_participant: Handle) -> Result<Arc<ParticipantKeyMaterial>> {
        let lp = self.registry().find::<LocalParticipant>(local_participant)?;
        lp.pair(remote_participant).ok_or_else(|| {
            CryptoError::InvalidArgument(format!(
                "participants {local_participant} and {remote_participant} are not matched"
            ))
        })
    }

    /// Match a remote datareader of `remote_participant` with a local writer.
    pub fn register_matched_remote_datareader(
        &self,
        local_writer: Handle,
        remote_participant: Handle,
    ) -> Result<Handle> {
        let writer = self.registry().find::<LocalDatawriter>(local_writer)?;
        self.registry().find::<RemoteParticipant>(remote_participant)?;

        let reader = if writer.is_builtin_volatile {
            let pair = self.pair_of(writer.participant, remote_participant)?;
            RemoteDatareader {
                participant: remote_participant,
                local_writer,
                metadata_protection: writer.metadata_protection,
                is_builtin_volatile: true,
                writer2reader_message_key_material: Some(Arc::clone(&pair.p2p_kx_key_material)),
                writer2reader_payload_key_material: None,
                writer_session: Some(Arc::clone(&pair.p2p_writer_session)),
                reader2writer_key_material: RwLock::new(Some(Arc::clone(&pair.p2p_kx_key_material))),
            }
        } else {
            let origin_auth = writer.metadata_protection.has_origin_authentication();
            RemoteDatareader {
                participant: remote_participant,
                local_writer,
                metadata_protection: writer.metadata_protection,
                is_builtin_volatile: false,
                writer2reader_message_key_material: writer
                    .message_key_material
                    .as_ref()
                    .map(|km| self.remote_copy(km, origin_auth)),
                writer2reader_payload_key_material: writer
                    .payload_key_material
                    .as_ref()
                    .map(|km| self.remote_copy(km, false)),
                writer_session: writer.message_session.clone(),
                reader2writer_key_material: RwLock::new(None),
            }
        };

        let handle = self.registry().insert(Arc::new(reader))?;
        info!(%handle, %local_writer, %remote_participant, "matched remote datareader");
        Ok(handle)
    }

    /// Match a remote datawriter of `remote_participant` with a local reader.
    pub fn register_matched_remote_datawriter(
        &self,
        local_reader: Handle,
        remote_participant: Handle,
    ) -> Result<Handle> {
        let reader = self.registry().find::<LocalDatareader>(local_reader)?;
        let remote = self.registry().find::<RemoteParticipant>(remote_participant)?;

        if reader.is_builtin_volatile {
            let pair = self.pair_of(reader.participant, remote_participant)?;
            let kx = Arc::clone(&pair.p2p_kx_key_material);
            let writer = RemoteDatawriter {
                participant: remote_participant,
                local_reader,
                metadata_protection: reader.metadata_protection,
                payload_protection: reader.payload_protection,
                is_builtin_volatile: true,
                reader2writer_key_material: Some(Arc::clone(&kx)),
                reader_session: Some(Arc::clone(&pair.p2p_reader_session)),
                writer2reader_key_material: RwLock::new([Some(Arc::clone(&kx)), Some(Arc::clone(&kx))]),
            };
            let handle = self.registry().insert(Arc::new(writer))?;
            remote.state.lock().relations.insert_endpoint(KeyRelation {
                category: SecureSubmessageCategory::DatawriterSubmessage,
                key_id: 0,
                local: local_reader,
                remote: handle,
                key_material: kx,
            });
            info!(%handle, %local_reader, %remote_participant, "matched remote builtin datawriter");
            return Ok(handle);
        }

        let origin_auth = reader.metadata_protection.has_origin_authentication();
        let writer = RemoteDatawriter {
            participant: remote_participant,
            local_reader,
            metadata_protection: reader.metadata_protection,
            payload_protection: reader.payload_protection,
            is_builtin_volatile: false,
            reader2writer_key_material: reader
                .reader_key_material
                .as_ref()
                .map(|km| self.remote_copy(km, origin_auth)),
            reader_session: reader.reader_session.clone(),
            writer2reader_key_material: RwLock::new([None, None]),
        };
        let handle = self.registry().insert(Arc::new(writer))?;
        info!(%handle, %local_reader, %remote_participant, "matched remote datawriter");
        Ok(handle)
    }
}

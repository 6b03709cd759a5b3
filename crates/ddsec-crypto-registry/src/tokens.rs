//! Key material handed to and received from key exchange.
//!
//! These operations work on deserialized key material; token framing and
//! validation live in the exchange crate.

use std::sync::Arc;

use tracing::{debug, info};

use ddsec_crypto_core::{CryptoError, Handle, MasterKeyMaterial, Result, TransformKind};

use crate::factory::KeyFactory;
use crate::objects::{
    LocalDatareader, LocalDatawriter, LocalParticipant, RemoteDatareader, RemoteDatawriter,
    RemoteParticipant,
};
use crate::relations::{KeyRelation, RelationIndex, SecureSubmessageCategory};

fn not_matched(local: Handle, remote: Handle) -> CryptoError {
    CryptoError::InvalidArgument(format!("{remote} is not matched with {local}"))
}

/// Replace the relations of `remote` keyed by the old material with ones
/// keyed by the new material.
fn rekey_relations(
    relations: &mut RelationIndex,
    category: SecureSubmessageCategory,
    local: Handle,
    remote: Handle,
    old: Option<&MasterKeyMaterial>,
    new: &Arc<MasterKeyMaterial>,
) {
    if let Some(old) = old {
        relations.remove_endpoint(old.sender_key_id(), local);
        if old.receiver_specific_key_id() != 0 {
            relations.remove_specific(old.receiver_specific_key_id());
        }
    }
    if new.transform_kind() == TransformKind::None {
        return;
    }
    relations.insert_endpoint(KeyRelation {
        category,
        key_id: new.sender_key_id(),
        local,
        remote,
        key_material: Arc::clone(new),
    });
    if new.receiver_specific_key_id() != 0 {
        relations.insert_specific(KeyRelation {
            category,
            key_id: new.receiver_specific_key_id(),
            local,
            remote,
            key_material: Arc::clone(new),
        });
    }
}

impl KeyFactory {
    /// Key material the local participant sends to `remote`.
    pub fn participant_key_material(&self, local: Handle, remote: Handle) -> Result<Arc<MasterKeyMaterial>> {
        let lp = self.registry().find::<LocalParticipant>(local)?;
        self.registry().find::<RemoteParticipant>(remote)?;
        let pair = lp.pair(remote).ok_or_else(|| not_matched(local, remote))?;
        Ok(Arc::clone(&pair.local_p2p_key_material))
    }

    /// Install the key material received from a remote participant.
    pub fn set_participant_key_material(
        &self,
        local: Handle,
        remote: Handle,
        key_material: MasterKeyMaterial,
    ) -> Result<()> {
        self.registry().find::<LocalParticipant>(local)?;
        let rp = self.registry().find::<RemoteParticipant>(remote)?;
        let key_material = Arc::new(key_material);

        let mut state = rp.state.lock();
        let pair = state
            .pairs
            .get(&local)
            .cloned()
            .ok_or_else(|| not_matched(local, remote))?;
        *pair.remote_key_material.write() = Some(Arc::clone(&key_material));

        let receiver_id = key_material.receiver_specific_key_id();
        if receiver_id != 0 {
            state.relations.insert_specific(KeyRelation {
                category: SecureSubmessageCategory::InfoSubmessage,
                key_id: receiver_id,
                local,
                remote,
                key_material: Arc::clone(&key_material),
            });
        }
        info!(
            %local,
            %remote,
            key_id = key_material.sender_key_id(),
            "installed remote participant key material"
        );
        Ok(())
    }

    /// Key material a local writer sends to a matched remote reader:
    /// message key first, then payload key. Empty for the volatile writer.
    pub fn datawriter_key_material(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
    ) -> Result<Vec<Arc<MasterKeyMaterial>>> {
        let writer = self.registry().find::<LocalDatawriter>(local_writer)?;
        let reader = self.registry().find::<RemoteDatareader>(remote_reader)?;
        if reader.local_writer != local_writer {
            return Err(not_matched(local_writer, remote_reader));
        }
        if writer.is_builtin_volatile {
            return Ok(Vec::new());
        }
        // The message key always comes first; a payload-only writer sends a
        // `None` placeholder in its place.
        Ok(
            match (
                reader.writer2reader_message_key_material.clone(),
                reader.writer2reader_payload_key_material.clone(),
            ) {
                (Some(message), Some(payload)) => vec![message, payload],
                (Some(message), None) => vec![message],
                (None, Some(payload)) => vec![Arc::new(MasterKeyMaterial::none()), payload],
                (None, None) => Vec::new(),
            },
        )
    }

    /// Install the key material received from a remote writer.
    ///
    /// With one entry it protects both submessages and payload; with two the
    /// first protects submessages and the second payload.
    pub fn set_datawriter_key_material(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
        key_material: Vec<MasterKeyMaterial>,
    ) -> Result<()> {
        self.registry().find::<LocalDatareader>(local_reader)?;
        let writer = self.registry().find::<RemoteDatawriter>(remote_writer)?;
        if writer.local_reader != local_reader {
            return Err(not_matched(local_reader, remote_writer));
        }
        if key_material.is_empty() || key_material.len() > 2 {
            return Err(CryptoError::InvalidArgument(format!(
                "expected 1 or 2 writer key materials, got {}",
                key_material.len()
            )));
        }
        let mut incoming = key_material.into_iter().map(Arc::new);
        let (Some(message), payload) = (incoming.next(), incoming.next()) else {
            return Err(CryptoError::InvalidArgument("no writer key material".into()));
        };
        let payload = payload.unwrap_or_else(|| Arc::clone(&message));

        let rp = self.registry().find::<RemoteParticipant>(writer.participant)?;
        let mut state = rp.state.lock();
        let mut slots = writer.writer2reader_key_material.write();
        rekey_relations(
            &mut state.relations,
            SecureSubmessageCategory::DatawriterSubmessage,
            local_reader,
            remote_writer,
            slots[0].as_deref(),
            &message,
        );
        debug!(
            %local_reader,
            %remote_writer,
            message_key_id = message.sender_key_id(),
            payload_key_id = payload.sender_key_id(),
            "installed remote datawriter key material"
        );
        *slots = [Some(message), Some(payload)];
        Ok(())
    }

    /// Key material a local reader sends to a matched remote writer.
    /// `None` when the reader's submessages are unprotected or it is the
    /// volatile reader.
    pub fn datareader_key_material(
        &self,
        local_reader: Handle,
        remote_writer: Handle,
    ) -> Result<Option<Arc<MasterKeyMaterial>>> {
        self.registry().find::<LocalDatareader>(local_reader)?;
        let writer = self.registry().find::<RemoteDatawriter>(remote_writer)?;
        if writer.local_reader != local_reader {
            return Err(not_matched(local_reader, remote_writer));
        }
        if writer.is_builtin_volatile {
            return Ok(None);
        }
        Ok(writer.reader2writer_key_material.clone())
    }

    /// Install the key material received from a remote reader.
    pub fn set_datareader_key_material(
        &self,
        local_writer: Handle,
        remote_reader: Handle,
        key_material: MasterKeyMaterial,
    ) -> Result<()> {
        self.registry().find::<LocalDatawriter>(local_writer)?;
        let reader = self.registry().find::<RemoteDatareader>(remote_reader)?;
        if reader.local_writer != local_writer {
            return Err(not_matched(local_writer, remote_reader));
        }
        let key_material = Arc::new(key_material);

        let rp = self.registry().find::<RemoteParticipant>(reader.participant)?;
        let mut state = rp.state.lock();
        let mut slot = reader.reader2writer_key_material.write();
        rekey_relations(
            &mut state.relations,
            SecureSubmessageCategory::DatareaderSubmessage,
            local_writer,
            remote_reader,
            slot.as_deref(),
            &key_material,
        );
        debug!(
            %local_writer,
            %remote_reader,
            key_id = key_material.sender_key_id(),
            "installed remote datareader key material"
        );
        *slot = Some(key_material);
        Ok(())
    }
}

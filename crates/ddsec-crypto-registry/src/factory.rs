//! The key factory: owner of key ids and entry point for the object model.
//!
//! Registration lives in [`crate::participant`] and [`crate::endpoint`],
//! token key material in [`crate::tokens`]. This module holds the shared
//! state, protection queries, triage lookups and unregistration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use ddsec_crypto_core::{
    CryptoError, Handle, KeyIdGenerator, KeySize, MasterKeyMaterial, ProtectionKind, Result,
    SessionConfig, SessionKeyMaterial, TransformKind,
};

use crate::objects::{
    CryptoObject, LocalDatareader, LocalDatawriter, LocalParticipant, RemoteDatareader,
    RemoteDatawriter, RemoteParticipant, SharedSession,
};
use crate::registry::Registry;
use crate::relations::{KeyRelation, SecureSubmessageCategory};

/// Creates and tears down crypto objects and their key material.
pub struct KeyFactory {
    registry: Arc<Registry>,
    ids: KeyIdGenerator,
    session_config: SessionConfig,
    default_key_size: KeySize,
    /// Remote participants by identity handle. Held across find-or-insert
    /// so one identity maps to one remote.
    remote_identities: Mutex<HashMap<u64, Handle>>,
}

impl KeyFactory {
    /// Create a factory over `registry`.
    pub fn new(registry: Arc<Registry>, session_config: SessionConfig, default_key_size: KeySize) -> Self {
        Self {
            registry,
            ids: KeyIdGenerator::new(),
            session_config,
            default_key_size,
            remote_identities: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub(crate) fn default_key_size(&self) -> KeySize {
        self.default_key_size
    }

    pub(crate) fn remote_identities(&self) -> &Mutex<HashMap<u64, Handle>> {
        &self.remote_identities
    }

    pub(crate) fn generate_key(&self, kind: TransformKind) -> Arc<MasterKeyMaterial> {
        Arc::new(MasterKeyMaterial::generate(kind, &self.ids))
    }

    pub(crate) fn new_session(&self, key_material: &Arc<MasterKeyMaterial>) -> Result<SharedSession> {
        let session = SessionKeyMaterial::new(Arc::clone(key_material), &self.session_config)?;
        Ok(Arc::new(Mutex::new(session)))
    }

    /// Copy of `key_material` for a matched remote, with a fresh
    /// receiver-specific key when `origin_auth` is set.
    pub(crate) fn remote_copy(
        &self,
        key_material: &MasterKeyMaterial,
        origin_auth: bool,
    ) -> Arc<MasterKeyMaterial> {
        let mut copy = key_material.copy_sender_part();
        if origin_auth && copy.transform_kind() != TransformKind::None {
            copy.add_receiver_specific_key(&self.ids);
        }
        Arc::new(copy)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// RTPS protection of a participant or submessage protection of an
    /// endpoint.
    pub fn get_protection_kind(&self, handle: Handle) -> Result<ProtectionKind> {
        Ok(match self.registry.get(handle)? {
            CryptoObject::LocalParticipant(p) => p.rtps_protection,
            CryptoObject::RemoteParticipant(p) => p.rtps_protection(),
            CryptoObject::LocalDatawriter(w) => w.metadata_protection,
            CryptoObject::RemoteDatawriter(w) => w.metadata_protection,
            CryptoObject::LocalDatareader(r) => r.metadata_protection,
            CryptoObject::RemoteDatareader(r) => r.metadata_protection,
        })
    }

    /// Resolve a sender key id seen in a crypto header to an endpoint pair.
    ///
    /// Key id 0 belongs to the volatile secure endpoints and is matched
    /// against the local participant's builtin reader.
    pub fn get_endpoint_relation(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
        key_id: u32,
    ) -> Result<KeyRelation> {
        let local = self.registry.find::<LocalParticipant>(local_participant)?;
        let remote = self.registry.find::<RemoteParticipant>(remote_participant)?;

        let local_hint = if key_id == 0 {
            Some(local.builtin_reader())
        } else {
            None
        };
        let found = remote
            .state
            .lock()
            .relations
            .find_endpoint(key_id, local_hint)
            .cloned();
        if let Some(relation) = found {
            return Ok(relation);
        }
        if key_id != 0 {
            if let Some(relation) = self.scan_endpoints(local_participant, remote_participant, key_id) {
                debug!(key_id, "relation resolved from endpoint key material");
                return Ok(relation);
            }
        }
        Err(CryptoError::InvalidHandle(format!(
            "no endpoint relation for key id {key_id}"
        )))
    }

    /// Look for a remote endpoint of `remote_participant`, matched to an
    /// endpoint of `local_participant`, that sends with `key_id`.
    fn scan_endpoints(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
        key_id: u32,
    ) -> Option<KeyRelation> {
        let owned_locally = |local: Handle| {
            self.registry
                .get(local)
                .ok()
                .and_then(|o| o.participant())
                == Some(local_participant)
        };

        for (handle, writer) in self
            .registry
            .handles_of::<RemoteDatawriter>(|w| w.participant == remote_participant)
        {
            if let Some(km) = writer.writer_key_material_by_id(key_id) {
                if owned_locally(writer.local_reader) {
                    return Some(KeyRelation {
                        category: SecureSubmessageCategory::DatawriterSubmessage,
                        key_id,
                        local: writer.local_reader,
                        remote: handle,
                        key_material: km,
                    });
                }
            }
        }
        for (handle, reader) in self
            .registry
            .handles_of::<RemoteDatareader>(|r| r.participant == remote_participant)
        {
            let Some(km) = reader.reader2writer_key_material() else {
                continue;
            };
            if km.sender_key_id() == key_id && owned_locally(reader.local_writer) {
                return Some(KeyRelation {
                    category: SecureSubmessageCategory::DatareaderSubmessage,
                    key_id,
                    local: reader.local_writer,
                    remote: handle,
                    key_material: km,
                });
            }
        }
        None
    }

    /// Resolve a receiver-specific key id through a remote participant.
    pub fn find_specific_relation(&self, remote_participant: Handle, key_id: u32) -> Result<Option<KeyRelation>> {
        let remote = self.registry.find::<RemoteParticipant>(remote_participant)?;
        let state = remote.state.lock();
        Ok(state.relations.find_specific(key_id).cloned())
    }

    /// An endpoint pair found through the specific-key index of
    /// `remote_participant` whose local side belongs to `local_participant`.
    /// Participant-level entries are not endpoint pairs and are skipped.
    pub fn find_specific_endpoint_relation(
        &self,
        local_participant: Handle,
        remote_participant: Handle,
        key_id: u32,
    ) -> Result<Option<KeyRelation>> {
        self.registry.find::<LocalParticipant>(local_participant)?;
        let Some(relation) = self.find_specific_relation(remote_participant, key_id)? else {
            return Ok(None);
        };
        if relation.category == SecureSubmessageCategory::InfoSubmessage {
            return Ok(None);
        }
        let owner = self.registry.get(relation.local).ok().and_then(|o| o.participant());
        Ok((owner == Some(local_participant)).then_some(relation))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Unregistration
    // ─────────────────────────────────────────────────────────────────────────

    /// Unregister a local or remote participant and everything hanging off it.
    pub fn unregister_participant(&self, handle: Handle) -> Result<()> {
        match self.registry.get(handle)? {
            CryptoObject::LocalParticipant(local) => self.unregister_local_participant(handle, &local),
            CryptoObject::RemoteParticipant(remote) => self.unregister_remote_participant(handle, &remote),
            other => Err(CryptoError::InvalidHandle(format!(
                "handle {handle} is a {:?}, expected a participant",
                other.kind()
            ))),
        }
    }

    fn unregister_local_participant(&self, handle: Handle, local: &LocalParticipant) -> Result<()> {
        for (writer, _) in self
            .registry
            .handles_of::<LocalDatawriter>(|w| w.participant == handle)
        {
            self.unregister_datawriter(writer)?;
        }
        for (reader, _) in self
            .registry
            .handles_of::<LocalDatareader>(|r| r.participant == handle)
        {
            self.unregister_datareader(reader)?;
        }

        let pairs = std::mem::take(&mut local.state.lock().pairs);
        for remote_handle in pairs.keys() {
            if let Ok(remote) = self.registry.find::<RemoteParticipant>(*remote_handle) {
                let mut state = remote.state.lock();
                state.pairs.remove(&handle);
                state.relations.remove_involving(handle);
            }
        }

        self.registry.remove::<LocalParticipant>(handle)?;
        info!(%handle, pairs = pairs.len(), "unregistered local participant");
        Ok(())
    }

    fn unregister_remote_participant(&self, handle: Handle, remote: &RemoteParticipant) -> Result<()> {
        let mut identities = self.remote_identities.lock();
        for (writer, _) in self
            .registry
            .handles_of::<RemoteDatawriter>(|w| w.participant == handle)
        {
            self.unregister_datawriter(writer)?;
        }
        for (reader, _) in self
            .registry
            .handles_of::<RemoteDatareader>(|r| r.participant == handle)
        {
            self.unregister_datareader(reader)?;
        }

        let pairs = {
            let mut state = remote.state.lock();
            state.relations = Default::default();
            std::mem::take(&mut state.pairs)
        };
        for local_handle in pairs.keys() {
            if let Ok(local) = self.registry.find::<LocalParticipant>(*local_handle) {
                local.state.lock().pairs.remove(&handle);
            }
        }

        self.registry.remove::<RemoteParticipant>(handle)?;
        identities.retain(|_, remote| *remote != handle);
        info!(%handle, pairs = pairs.len(), "unregistered remote participant");
        Ok(())
    }

    /// Unregister a local or remote datawriter.
    ///
    /// A local writer takes the remote readers matched to it along.
    pub fn unregister_datawriter(&self, handle: Handle) -> Result<()> {
        match self.registry.get(handle)? {
            CryptoObject::LocalDatawriter(_) => {
                for (reader, _) in self
                    .registry
                    .handles_of::<RemoteDatareader>(|r| r.local_writer == handle)
                {
                    self.unregister_datareader(reader)?;
                }
                self.registry.remove::<LocalDatawriter>(handle)?;
                info!(%handle, "unregistered local datawriter");
                Ok(())
            }
            CryptoObject::RemoteDatawriter(writer) => {
                self.drop_relations(writer.participant, handle);
                self.registry.remove::<RemoteDatawriter>(handle)?;
                info!(%handle, "unregistered remote datawriter");
                Ok(())
            }
            other => Err(CryptoError::InvalidHandle(format!(
                "handle {handle} is a {:?}, expected a datawriter",
                other.kind()
            ))),
        }
    }

    /// Unregister a local or remote datareader.
    ///
    /// A local reader takes the remote writers matched to it along.
    pub fn unregister_datareader(&self, handle: Handle) -> Result<()> {
        match self.registry.get(handle)? {
            CryptoObject::LocalDatareader(reader) => {
                for (writer, _) in self
                    .registry
                    .handles_of::<RemoteDatawriter>(|w| w.local_reader == handle)
                {
                    self.unregister_datawriter(writer)?;
                }
                if reader.is_builtin_volatile {
                    if let Ok(participant) = self.registry.find::<LocalParticipant>(reader.participant) {
                        let mut state = participant.state.lock();
                        if state.builtin_reader == handle {
                            state.builtin_reader = Handle::NIL;
                        }
                    }
                }
                self.registry.remove::<LocalDatareader>(handle)?;
                info!(%handle, "unregistered local datareader");
                Ok(())
            }
            CryptoObject::RemoteDatareader(reader) => {
                self.drop_relations(reader.participant, handle);
                self.registry.remove::<RemoteDatareader>(handle)?;
                info!(%handle, "unregistered remote datareader");
                Ok(())
            }
            other => Err(CryptoError::InvalidHandle(format!(
                "handle {handle} is a {:?}, expected a datareader",
                other.kind()
            ))),
        }
    }

    fn drop_relations(&self, remote_participant: Handle, endpoint: Handle) {
        if let Ok(remote) = self.registry.find::<RemoteParticipant>(remote_participant) {
            let removed = remote.state.lock().relations.remove_involving(endpoint);
            debug!(%endpoint, removed, "dropped key relations");
        }
    }
}

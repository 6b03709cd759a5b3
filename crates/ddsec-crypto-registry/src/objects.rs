//! Crypto object variants held by the registry.
//!
//! Objects are immutable after construction except for the fields that key
//! exchange or matching fills in later; those sit behind their own locks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use ddsec_crypto_core::{
    BasicProtectionKind, Handle, KeySize, MasterKeyMaterial, ProtectionKind, SessionKeyMaterial,
};

use crate::relations::RelationIndex;

/// A session shared between the objects that send with it.
pub type SharedSession = Arc<Mutex<SessionKeyMaterial>>;

/// Discriminator of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    LocalParticipant,
    RemoteParticipant,
    LocalDatawriter,
    RemoteDatawriter,
    LocalDatareader,
    RemoteDatareader,
}

/// A registered crypto context.
#[derive(Clone)]
pub enum CryptoObject {
    LocalParticipant(Arc<LocalParticipant>),
    RemoteParticipant(Arc<RemoteParticipant>),
    LocalDatawriter(Arc<LocalDatawriter>),
    RemoteDatawriter(Arc<RemoteDatawriter>),
    LocalDatareader(Arc<LocalDatareader>),
    RemoteDatareader(Arc<RemoteDatareader>),
}

impl CryptoObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            CryptoObject::LocalParticipant(_) => ObjectKind::LocalParticipant,
            CryptoObject::RemoteParticipant(_) => ObjectKind::RemoteParticipant,
            CryptoObject::LocalDatawriter(_) => ObjectKind::LocalDatawriter,
            CryptoObject::RemoteDatawriter(_) => ObjectKind::RemoteDatawriter,
            CryptoObject::LocalDatareader(_) => ObjectKind::LocalDatareader,
            CryptoObject::RemoteDatareader(_) => ObjectKind::RemoteDatareader,
        }
    }

    /// Owning participant of an endpoint; `None` for participants.
    pub fn participant(&self) -> Option<Handle> {
        match self {
            CryptoObject::LocalParticipant(_) | CryptoObject::RemoteParticipant(_) => None,
            CryptoObject::LocalDatawriter(w) => Some(w.participant),
            CryptoObject::RemoteDatawriter(w) => Some(w.participant),
            CryptoObject::LocalDatareader(r) => Some(r.participant),
            CryptoObject::RemoteDatareader(r) => Some(r.participant),
        }
    }
}

impl fmt::Debug for CryptoObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoObject({:?})", self.kind())
    }
}

/// Typed access to registry entries.
pub trait RegistryEntry: Sized {
    const KIND: ObjectKind;

    fn wrap(this: Arc<Self>) -> CryptoObject;

    fn unwrap(object: &CryptoObject) -> Option<Arc<Self>>;
}

macro_rules! registry_entry {
    ($ty:ident) => {
        impl RegistryEntry for $ty {
            const KIND: ObjectKind = ObjectKind::$ty;

            fn wrap(this: Arc<Self>) -> CryptoObject {
                CryptoObject::$ty(this)
            }

            fn unwrap(object: &CryptoObject) -> Option<Arc<Self>> {
                match object {
                    CryptoObject::$ty(inner) => Some(Arc::clone(inner)),
                    _ => None,
                }
            }
        }
    };
}

registry_entry!(LocalParticipant);
registry_entry!(RemoteParticipant);
registry_entry!(LocalDatawriter);
registry_entry!(RemoteDatawriter);
registry_entry!(LocalDatareader);
registry_entry!(RemoteDatareader);

/// Key material shared by one local and one remote participant.
pub struct ParticipantKeyMaterial {
    pub local: Handle,
    pub remote: Handle,
    /// Copy of the local participant key, plus a receiver-specific key
    /// when the local RTPS protection requires origin authentication.
    pub local_p2p_key_material: Arc<MasterKeyMaterial>,
    /// Key-exchange material derived from the shared secret.
    pub p2p_kx_key_material: Arc<MasterKeyMaterial>,
    pub p2p_writer_session: SharedSession,
    pub p2p_reader_session: SharedSession,
    /// The remote participant's key, installed from its tokens.
    pub remote_key_material: RwLock<Option<Arc<MasterKeyMaterial>>>,
}

impl ParticipantKeyMaterial {
    pub fn remote_key_material(&self) -> Option<Arc<MasterKeyMaterial>> {
        self.remote_key_material.read().clone()
    }
}

pub struct LocalParticipant {
    pub identity_handle: u64,
    pub permissions_handle: u64,
    pub rtps_protection: ProtectionKind,
    pub key_size: KeySize,
    pub key_material: Option<Arc<MasterKeyMaterial>>,
    pub session: Option<SharedSession>,
    pub state: Mutex<LocalParticipantState>,
}

#[derive(Default)]
pub struct LocalParticipantState {
    /// Pairs keyed by remote participant handle.
    pub pairs: BTreeMap<Handle, Arc<ParticipantKeyMaterial>>,
    /// The builtin volatile secure reader, once registered.
    pub builtin_reader: Handle,
}

impl LocalParticipant {
    pub fn pair(&self, remote: Handle) -> Option<Arc<ParticipantKeyMaterial>> {
        self.state.lock().pairs.get(&remote).cloned()
    }

    pub fn builtin_reader(&self) -> Handle {
        self.state.lock().builtin_reader
    }
}

pub struct RemoteParticipant {
    pub identity_handle: u64,
    pub permissions_handle: u64,
    pub state: Mutex<RemoteParticipantState>,
}

pub struct RemoteParticipantState {
    /// Protection expected on RTPS messages from this remote.
    pub rtps_protection: ProtectionKind,
    /// Pairs keyed by local participant handle.
    pub pairs: BTreeMap<Handle, Arc<ParticipantKeyMaterial>>,
    pub relations: RelationIndex,
}

impl RemoteParticipant {
    pub fn pair(&self, local: Handle) -> Option<Arc<ParticipantKeyMaterial>> {
        self.state.lock().pairs.get(&local).cloned()
    }

    pub fn rtps_protection(&self) -> ProtectionKind {
        self.state.lock().rtps_protection
    }
}

pub struct LocalDatawriter {
    pub participant: Handle,
    pub metadata_protection: ProtectionKind,
    pub payload_protection: BasicProtectionKind,
    pub is_builtin_volatile: bool,
    pub message_key_material: Option<Arc<MasterKeyMaterial>>,
    pub message_session: Option<SharedSession>,
    pub payload_key_material: Option<Arc<MasterKeyMaterial>>,
    pub payload_session: Option<SharedSession>,
}

pub struct LocalDatareader {
    pub participant: Handle,
    pub metadata_protection: ProtectionKind,
    pub payload_protection: BasicProtectionKind,
    pub is_builtin_volatile: bool,
    pub reader_key_material: Option<Arc<MasterKeyMaterial>>,
    pub reader_session: Option<SharedSession>,
}

/// A remote reader matched to one local writer.
pub struct RemoteDatareader {
    /// The remote participant.
    pub participant: Handle,
    pub local_writer: Handle,
    pub metadata_protection: ProtectionKind,
    pub is_builtin_volatile: bool,
    /// Sender part of the writer's message key, plus this reader's
    /// receiver-specific key under origin authentication.
    pub writer2reader_message_key_material: Option<Arc<MasterKeyMaterial>>,
    pub writer2reader_payload_key_material: Option<Arc<MasterKeyMaterial>>,
    pub writer_session: Option<SharedSession>,
    /// The remote reader's key, installed from its tokens.
    pub reader2writer_key_material: RwLock<Option<Arc<MasterKeyMaterial>>>,
}

impl RemoteDatareader {
    pub fn reader2writer_key_material(&self) -> Option<Arc<MasterKeyMaterial>> {
        self.reader2writer_key_material.read().clone()
    }
}

/// A remote writer matched to one local reader.
pub struct RemoteDatawriter {
    /// The remote participant.
    pub participant: Handle,
    pub local_reader: Handle,
    pub metadata_protection: ProtectionKind,
    pub payload_protection: BasicProtectionKind,
    pub is_builtin_volatile: bool,
    /// Sender part of the reader's key, plus this writer's receiver-specific
    /// key under origin authentication.
    pub reader2writer_key_material: Option<Arc<MasterKeyMaterial>>,
    pub reader_session: Option<SharedSession>,
    /// Message and payload keys of the remote writer, installed from its
    /// tokens. Slot 1 repeats slot 0 when only one token was sent.
    pub writer2reader_key_material: RwLock<[Option<Arc<MasterKeyMaterial>>; 2]>,
}

impl RemoteDatawriter {
    /// Remote writer key material whose sender key id is `key_id`.
    pub fn writer_key_material_by_id(&self, key_id: u32) -> Option<Arc<MasterKeyMaterial>> {
        self.writer2reader_key_material
            .read()
            .iter()
            .flatten()
            .find(|km| km.sender_key_id() == key_id)
            .cloned()
    }

    pub fn writer2reader_key_material(&self) -> [Option<Arc<MasterKeyMaterial>>; 2] {
        self.writer2reader_key_material.read().clone()
    }
}

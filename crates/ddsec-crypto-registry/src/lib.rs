//! # DDS Security Crypto Registry
//!
//! The object model of the crypto plugin: a generation-checked handle table
//! holding participant and endpoint crypto contexts, the per-remote relation
//! index, and the [`KeyFactory`] that registers, matches and unregisters them.
//!
//! ## Key Concepts
//!
//! - **Handle**: opaque, generation-checked; a removed object's handle never
//!   resolves again, even after its slot is reused.
//! - **Capability check**: every lookup names the expected object type, so a
//!   reader handle cannot be used where a writer is required.
//! - **Relation index**: per remote participant, maps a wire key id to the
//!   local/remote endpoint pair that owns it.
//! - **Locking**: each participant context has its own lock. Sessions have
//!   their own lock so rotation is atomic with respect to concurrent encodes.

pub mod endpoint;
pub mod factory;
pub mod objects;
pub mod participant;
pub mod registry;
pub mod relations;
pub mod tokens;

pub use factory::KeyFactory;
pub use objects::{
    CryptoObject, LocalDatareader, LocalDatawriter, LocalParticipant, ObjectKind,
    ParticipantKeyMaterial, RegistryEntry, RemoteDatareader, RemoteDatawriter, RemoteParticipant,
    SharedSession,
};
pub use registry::Registry;
pub use relations::{KeyRelation, RelationIndex, SecureSubmessageCategory};

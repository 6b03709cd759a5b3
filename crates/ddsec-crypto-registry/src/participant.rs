//! Participant registration and matching.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use ddsec_crypto_core::{
    CryptoError, Handle, KeySize, MasterKeyMaterial, ParticipantSecurityAttributes,
    ProtectionKind, PropertySet, Result, SharedSecret, TransformKind,
};

use crate::factory::KeyFactory;
use crate::objects::{
    LocalParticipant, LocalParticipantState, ParticipantKeyMaterial, RemoteParticipant,
    RemoteParticipantState,
};
use crate::relations::RelationIndex;

impl KeyFactory {
    /// Register a local participant and generate its key material.
    pub fn register_local_participant(
        &self,
        identity_handle: u64,
        permissions_handle: u64,
        properties: &PropertySet,
        attributes: &ParticipantSecurityAttributes,
    ) -> Result<Handle> {
        if identity_handle == 0 {
            return Err(CryptoError::InvalidArgument("nil identity handle".into()));
        }
        if permissions_handle == 0 {
            return Err(CryptoError::InvalidArgument("nil permissions handle".into()));
        }

        let rtps_protection = ProtectionKind::for_participant(attributes);
        let key_size = KeySize::from_properties(properties, self.default_key_size());
        let kind = rtps_protection.transform_kind(key_size);

        let (key_material, session) = if kind == TransformKind::None {
            (None, None)
        } else {
            let km = self.generate_key(kind);
            let session = self.new_session(&km)?;
            (Some(km), Some(session))
        };

        let participant = LocalParticipant {
            identity_handle,
            permissions_handle,
            rtps_protection,
            key_size,
            key_material,
            session,
            state: Mutex::new(LocalParticipantState::default()),
        };
        let handle = self.registry().insert(Arc::new(participant))?;
        info!(%handle, ?rtps_protection, ?kind, "registered local participant");
        Ok(handle)
    }

    /// Match a remote participant with a local one.
    ///
    /// The remote is found by identity or created. Matching the same pair
    /// twice returns the existing remote handle without new keys.
    pub fn register_matched_remote_participant(
        &self,
        local_participant: Handle,
        remote_identity_handle: u64,
        remote_permissions_handle: u64,
        shared_secret: &SharedSecret,
    ) -> Result<Handle> {
        let local = self.registry().find::<LocalParticipant>(local_participant)?;
        if remote_identity_handle == 0 {
            return Err(CryptoError::InvalidArgument("nil remote identity handle".into()));
        }

        let mut identities = self.remote_identities().lock();
        let existing = identities
            .get(&remote_identity_handle)
            .and_then(|handle| {
                self.registry()
                    .find::<RemoteParticipant>(*handle)
                    .ok()
                    .map(|remote| (*handle, remote))
            });
        if let Some((handle, _)) = &existing {
            if local.pair(*handle).is_some() {
                return Ok(*handle);
            }
        }

        // Everything fallible happens before anything is published
        let kx = Arc::new(MasterKeyMaterial::key_exchange(shared_secret)?);
        let p2p_writer_session = self.new_session(&kx)?;
        let p2p_reader_session = self.new_session(&kx)?;
        let local_p2p_key_material = match &local.key_material {
            Some(km) => self.remote_copy(km, local.rtps_protection.has_origin_authentication()),
            None => Arc::new(MasterKeyMaterial::none()),
        };

        let (remote_handle, remote) = match existing {
            Some(found) => found,
            None => {
                let remote = Arc::new(RemoteParticipant {
                    identity_handle: remote_identity_handle,
                    permissions_handle: remote_permissions_handle,
                    state: Mutex::new(RemoteParticipantState {
                        rtps_protection: local.rtps_protection,
                        pairs: BTreeMap::new(),
                        relations: RelationIndex::new(),
                    }),
                });
                let handle = self.registry().insert(Arc::clone(&remote))?;
                identities.insert(remote_identity_handle, handle);
                (handle, remote)
            }
        };

        let pair = Arc::new(ParticipantKeyMaterial {
            local: local_participant,
            remote: remote_handle,
            local_p2p_key_material,
            p2p_kx_key_material: kx,
            p2p_writer_session,
            p2p_reader_session,
            remote_key_material: RwLock::new(None),
        });

        local.state.lock().pairs.insert(remote_handle, Arc::clone(&pair));
        {
            let mut state = remote.state.lock();
            state.pairs.insert(local_participant, pair);
            state.rtps_protection = local.rtps_protection;
        }
        drop(identities);

        info!(
            local = %local_participant,
            remote = %remote_handle,
            "matched remote participant"
        );
        Ok(remote_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use crate::registry::Registry;
    use ddsec_crypto_core::types::KEY_SIZE_PROPERTY;
    use ddsec_crypto_core::SessionConfig;

    fn factory() -> KeyFactory {
        KeyFactory::new(Arc::new(Registry::new()), SessionConfig::default(), KeySize::Aes256)
    }

    fn secret() -> SharedSecret {
        SharedSecret::new([1; 32], [2; 32], vec![3; 32])
    }

    #[test]
    fn test_register_local_participant_generates_key() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Encrypt);
        let h = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();

        let p = f.registry().find::<LocalParticipant>(h).unwrap();
        let km = p.key_material.as_ref().unwrap();
        assert_eq!(km.transform_kind(), TransformKind::Aes256Gcm);
        assert!(p.session.is_some());
        assert_eq!(f.get_protection_kind(h).unwrap(), ProtectionKind::Encrypt);
    }

    #[test]
    fn test_register_local_participant_key_size_property() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let props = PropertySet::new().with(KEY_SIZE_PROPERTY, "128");
        let h = f.register_local_participant(1, 1, &props, &attrs).unwrap();
        let p = f.registry().find::<LocalParticipant>(h).unwrap();
        assert_eq!(
            p.key_material.as_ref().unwrap().transform_kind(),
            TransformKind::Aes128Gmac
        );
    }

    #[test]
    fn test_register_unprotected_participant_has_no_key() {
        let f = factory();
        let h = f
            .register_local_participant(1, 1, &PropertySet::new(), &ParticipantSecurityAttributes::default())
            .unwrap();
        let p = f.registry().find::<LocalParticipant>(h).unwrap();
        assert!(p.key_material.is_none());
        assert!(p.session.is_none());
    }

    #[test]
    fn test_register_rejects_nil_identity() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::default();
        assert!(f.register_local_participant(0, 1, &PropertySet::new(), &attrs).is_err());
        assert!(f.register_local_participant(1, 0, &PropertySet::new(), &attrs).is_err());
        assert!(f.registry().is_empty());
    }

    #[test]
    fn test_match_remote_participant() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::EncryptWithOriginAuthentication);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
        let remote = f.register_matched_remote_participant(local, 2, 2, &secret()).unwrap();

        let lp = f.registry().find::<LocalParticipant>(local).unwrap();
        let pair = lp.pair(remote).unwrap();
        let source = lp.key_material.as_ref().unwrap();
        assert_eq!(pair.local_p2p_key_material.sender_key_id(), source.sender_key_id());
        assert_ne!(pair.local_p2p_key_material.receiver_specific_key_id(), 0);
        assert_eq!(pair.p2p_kx_key_material.transform_kind(), TransformKind::Aes256Gcm);
        assert!(pair.remote_key_material().is_none());

        let rp = f.registry().find::<RemoteParticipant>(remote).unwrap();
        assert!(rp.pair(local).is_some());
        assert_eq!(
            f.get_protection_kind(remote).unwrap(),
            ProtectionKind::EncryptWithOriginAuthentication
        );
    }

    #[test]
    fn test_match_is_idempotent_per_identity() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
        let r1 = f.register_matched_remote_participant(local, 7, 7, &secret()).unwrap();
        let r2 = f.register_matched_remote_participant(local, 7, 7, &secret()).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(f.registry().len(), 2);
    }

    #[test]
    fn test_concurrent_match_shares_one_remote() {
        let f = Arc::new(factory());
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();

        for identity in 10..60u64 {
            let barrier = Arc::new(Barrier::new(2));
            let threads: Vec<_> = (0..2)
                .map(|_| {
                    let f = Arc::clone(&f);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        f.register_matched_remote_participant(local, identity, identity, &secret())
                            .unwrap()
                    })
                })
                .collect();
            let handles: Vec<Handle> = threads.into_iter().map(|t| t.join().unwrap()).collect();
            assert_eq!(handles[0], handles[1]);

            let remotes = f
                .registry()
                .handles_of::<RemoteParticipant>(|r| r.identity_handle == identity);
            assert_eq!(remotes.len(), 1);
        }
        let lp = f.registry().find::<LocalParticipant>(local).unwrap();
        assert_eq!(lp.state.lock().pairs.len(), 50);
    }

    #[test]
    fn test_rematch_after_unregister_creates_new_remote() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
        let first = f.register_matched_remote_participant(local, 7, 7, &secret()).unwrap();
        f.unregister_participant(first).unwrap();

        let second = f.register_matched_remote_participant(local, 7, 7, &secret()).unwrap();
        assert_ne!(first, second);
        assert!(f.registry().find::<RemoteParticipant>(second).is_ok());
        assert_eq!(f.registry().len(), 2);
    }

    #[test]
    fn test_match_with_empty_secret_leaves_nothing_behind() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
        let empty = SharedSecret::new([0; 32], [0; 32], vec![]);
        assert!(f.register_matched_remote_participant(local, 7, 7, &empty).is_err());
        assert_eq!(f.registry().len(), 1);
    }

    #[test]
    fn test_unregister_local_participant_clears_pairs() {
        let f = factory();
        let attrs = ParticipantSecurityAttributes::rtps(ProtectionKind::Sign);
        let local = f.register_local_participant(1, 1, &PropertySet::new(), &attrs).unwrap();
        let remote = f.register_matched_remote_participant(local, 7, 7, &secret()).unwrap();

        f.unregister_participant(local).unwrap();
        assert!(f.registry().find::<LocalParticipant>(local).is_err());
        let rp = f.registry().find::<RemoteParticipant>(remote).unwrap();
        assert!(rp.pair(local).is_none());

        // A second unregister is an invalid handle
        assert!(matches!(
            f.unregister_participant(local),
            Err(CryptoError::InvalidHandle(_))
        ));
    }
}

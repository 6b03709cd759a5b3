//! Generation-checked handle table.
//!
//! Removing an entry bumps its slot generation, so a stale handle never
//! resolves to whatever object later reuses the slot. The table lock only
//! covers insert, find and remove; callers work on the returned `Arc`
//! without holding it.

use std::sync::Arc;

use parking_lot::RwLock;

use ddsec_crypto_core::{CryptoError, Handle, Result};

use crate::objects::{CryptoObject, RegistryEntry};

/// Handle-addressed store of crypto objects.
pub struct Registry {
    inner: RwLock<Slots>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

struct Slot {
    generation: u32,
    object: Option<CryptoObject>,
}

impl Slots {
    fn get(&self, handle: Handle) -> Option<&CryptoObject> {
        let slot = self.entries.get(handle.index()? as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.object.as_ref()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Slots::default()),
        }
    }

    /// Publish a fully constructed object and return its handle.
    pub fn insert<T: RegistryEntry>(&self, object: Arc<T>) -> Result<Handle> {
        let mut inner = self.inner.write();
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(inner.entries.len())
                    .ok()
                    .filter(|i| *i < u32::MAX)
                    .ok_or_else(|| CryptoError::ResourceExhausted("handle table full".into()))?;
                inner.entries.push(Slot {
                    generation: 1,
                    object: None,
                });
                index
            }
        };
        let slot = &mut inner.entries[index as usize];
        slot.object = Some(T::wrap(object));
        let handle = Handle::from_parts(index, slot.generation);
        inner.live += 1;
        Ok(handle)
    }

    /// Look up `handle`, requiring it to be a `T`.
    pub fn find<T: RegistryEntry>(&self, handle: Handle) -> Result<Arc<T>> {
        let inner = self.inner.read();
        let object = inner.get(handle).ok_or_else(|| unknown(handle))?;
        T::unwrap(object).ok_or_else(|| mismatch::<T>(handle, object))
    }

    /// Look up `handle` whatever its kind.
    pub fn get(&self, handle: Handle) -> Result<CryptoObject> {
        self.inner.read().get(handle).cloned().ok_or_else(|| unknown(handle))
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.read().get(handle).is_some()
    }

    /// Remove `handle`, requiring it to be a `T`. A kind mismatch leaves the
    /// entry in place.
    pub fn remove<T: RegistryEntry>(&self, handle: Handle) -> Result<Arc<T>> {
        let mut inner = self.inner.write();
        let object = inner.get(handle).ok_or_else(|| unknown(handle))?;
        let typed = T::unwrap(object).ok_or_else(|| mismatch::<T>(handle, object))?;

        // get() succeeded, so the index is valid and the generation matches
        if let Some(index) = handle.index() {
            let slot = &mut inner.entries[index as usize];
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1).max(1);
            inner.free.push(index);
            inner.live -= 1;
        }
        Ok(typed)
    }

    /// Handles of all `T` entries matching `pred`.
    pub fn handles_of<T: RegistryEntry>(&self, pred: impl Fn(&T) -> bool) -> Vec<(Handle, Arc<T>)> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let typed = T::unwrap(slot.object.as_ref()?)?;
                pred(&typed).then(|| (Handle::from_parts(index as u32, slot.generation), typed))
            })
            .collect()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(handle: Handle) -> CryptoError {
    CryptoError::InvalidHandle(format!("unknown handle {handle}"))
}

fn mismatch<T: RegistryEntry>(handle: Handle, found: &CryptoObject) -> CryptoError {
    CryptoError::InvalidHandle(format!(
        "handle {handle} is a {:?}, expected {:?}",
        found.kind(),
        T::KIND
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{LocalDatareader, LocalDatawriter};
    use ddsec_crypto_core::{BasicProtectionKind, ProtectionKind};

    fn writer() -> Arc<LocalDatawriter> {
        Arc::new(LocalDatawriter {
            participant: Handle::from_parts(0, 1),
            metadata_protection: ProtectionKind::None,
            payload_protection: BasicProtectionKind::None,
            is_builtin_volatile: false,
            message_key_material: None,
            message_session: None,
            payload_key_material: None,
            payload_session: None,
        })
    }

    #[test]
    fn test_insert_find_remove() {
        let registry = Registry::new();
        let h = registry.insert(writer()).unwrap();
        assert!(!h.is_nil());
        assert_eq!(registry.len(), 1);

        assert!(registry.find::<LocalDatawriter>(h).is_ok());
        registry.remove::<LocalDatawriter>(h).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.find::<LocalDatawriter>(h),
            Err(CryptoError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_kind_mismatch_is_invalid_handle() {
        let registry = Registry::new();
        let h = registry.insert(writer()).unwrap();
        assert!(matches!(
            registry.find::<LocalDatareader>(h),
            Err(CryptoError::InvalidHandle(_))
        ));
        // A mismatched remove does not remove
        assert!(registry.remove::<LocalDatareader>(h).is_err());
        assert!(registry.contains(h));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let registry = Registry::new();
        let old = registry.insert(writer()).unwrap();
        registry.remove::<LocalDatawriter>(old).unwrap();

        let new = registry.insert(writer()).unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(registry.find::<LocalDatawriter>(old).is_err());
        assert!(registry.find::<LocalDatawriter>(new).is_ok());
    }

    #[test]
    fn test_nil_handle_unknown() {
        let registry = Registry::new();
        assert!(registry.get(Handle::NIL).is_err());
    }

    #[test]
    fn test_handles_of_filters() {
        let registry = Registry::new();
        let a = registry.insert(writer()).unwrap();
        let _b = registry.insert(writer()).unwrap();
        let found = registry.handles_of::<LocalDatawriter>(|_| true);
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|(h, _)| *h == a));
        assert!(registry.handles_of::<LocalDatareader>(|_| true).is_empty());
    }
}

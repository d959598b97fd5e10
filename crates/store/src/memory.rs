//! In-RAM object store with store-assigned UIDs and resource versions.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use keel_core::{ManagedObject, ObjectKey, StoreError};
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

use crate::{key_of, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<ObjectKey, ManagedObject>,
    next_rv: u64,
    faults: FxHashMap<Verb, VecDeque<StoreError>>,
    calls: FxHashMap<Verb, u64>,
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    /// Count the call and pop an injected fault, if any.
    fn enter(&mut self, verb: Verb) -> Result<(), StoreError> {
        *self.calls.entry(verb).or_insert(0) += 1;
        match self.faults.get_mut(&verb).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn admit(&mut self, mut obj: ManagedObject) -> ManagedObject {
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        obj.metadata.resource_version = Some(self.bump_rv());
        obj
    }
}

/// Shared in-memory store. Objects are keyed by `ObjectKey`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Store seeded with pre-existing objects (UID/resource version assigned when absent).
    pub fn with_objects(objects: impl IntoIterator<Item = ManagedObject>) -> Result<Self, StoreError> {
        let store = Self::new();
        for obj in objects {
            store.insert(obj)?;
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put an object in place bypassing the verbs, as an external actor would.
    pub fn insert(&self, obj: ManagedObject) -> Result<ManagedObject, StoreError> {
        let key = key_of(&obj)?;
        let mut inner = self.lock();
        let stored = inner.admit(obj);
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    /// Remove an object bypassing the verbs, as an external actor would.
    pub fn remove(&self, key: &ObjectKey) -> Option<ManagedObject> { self.lock().objects.remove(key) }

    pub fn object(&self, key: &ObjectKey) -> Option<ManagedObject> { self.lock().objects.get(key).cloned() }

    /// All objects of a kind, sorted by namespace then name.
    pub fn list(&self, kind: &str) -> Vec<ManagedObject> {
        let inner = self.lock();
        let mut out: Vec<(ObjectKey, ManagedObject)> = inner
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Queue an error returned by the next call of `verb`.
    pub fn fail_next(&self, verb: Verb, err: StoreError) {
        self.lock().faults.entry(verb).or_default().push_back(err);
    }

    pub fn calls(&self, verb: Verb) -> u64 { self.lock().calls.get(&verb).copied().unwrap_or(0) }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Get)?;
        inner.objects.get(key).cloned().ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError> {
        let key = key_of(obj)?;
        let mut inner = self.lock();
        inner.enter(Verb::Create)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut fresh = obj.clone();
        fresh.metadata.uid = None;
        let stored = inner.admit(fresh);
        debug!(key = %key, rv = ?stored.metadata.resource_version, "memory store: created");
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError> {
        let key = key_of(obj)?;
        let mut inner = self.lock();
        inner.enter(Verb::Update)?;
        let current = inner.objects.get(&key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{}: resource version {} is stale (current {:?})",
                    key, rv, current.metadata.resource_version
                )));
            }
        }
        let mut next = obj.clone();
        next.metadata.uid = current.metadata.uid.clone();
        let stored = inner.admit(next);
        debug!(key = %key, rv = ?stored.metadata.resource_version, "memory store: updated");
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.enter(Verb::Delete)?;
        inner.objects.remove(key).map(|_| ()).ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::managed_object;

    fn cm(name: &str) -> ManagedObject { managed_object("v1", "ConfigMap", Some("ns"), name) }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let created = store.create(&cm("a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        let err = store.create(&cm("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.calls(Verb::Create), 2);
    }

    #[tokio::test]
    async fn update_checks_resource_version() {
        let store = MemoryStore::new();
        let created = store.create(&cm("a")).await.unwrap();
        let updated = store.update(&created).await.unwrap();
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);
        // the first copy is now stale
        let err = store.update(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("v1", "ConfigMap", Some("ns"), "nope");
        assert!(store.get(&key).await.unwrap_err().is_not_found());
        assert!(store.update(&cm("nope")).await.unwrap_err().is_not_found());
        assert!(store.delete(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let store = MemoryStore::with_objects([cm("a")]).unwrap();
        let key = ObjectKey::new("v1", "ConfigMap", Some("ns"), "a");
        store.fail_next(Verb::Get, StoreError::Unavailable("boom".into()));
        assert!(matches!(store.get(&key).await, Err(StoreError::Unavailable(_))));
        assert!(store.get(&key).await.is_ok());
        assert_eq!(store.calls(Verb::Get), 2);
    }

    #[test]
    fn list_is_sorted_and_filtered() {
        let store = MemoryStore::with_objects([cm("b"), cm("a"), managed_object("v1", "Secret", Some("ns"), "s")]).unwrap();
        let names: Vec<_> = store.list("ConfigMap").into_iter().filter_map(|o| o.metadata.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.len(), 3);
    }
}

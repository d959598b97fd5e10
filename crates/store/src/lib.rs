//! Keel store: the object-store seam the engine talks to, an in-memory
//! implementation for tests and dry runs, and a kube-backed implementation.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use keel_core::{ManagedObject, ObjectKey, StoreError};

pub mod cluster;
pub mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, Verb};

/// Object-store primitives addressed by `(kind, namespace, name)`.
///
/// Calls are not retried here; transient failures surface to the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedObject, StoreError>;

    /// Create `obj` and return it as stored (UID and resource version assigned).
    async fn create(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError>;

    /// Replace an existing object. A stale resource version is a `Conflict`.
    async fn update(&self, obj: &ManagedObject) -> Result<ManagedObject, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

pub(crate) fn key_of(obj: &ManagedObject) -> Result<ObjectKey, StoreError> {
    ObjectKey::of(obj).ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind or metadata.name".into()))
}

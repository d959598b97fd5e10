//! The per-kind contract a caller implements to plug a resource kind into the engine.

use async_trait::async_trait;
use keel_core::{ManagedObject, ObjectKey};
use keel_store::ObjectStore;

use crate::error::{Error, Result};
use crate::request::Request;

/// Result of [`Hook::update_existing`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub object: ManagedObject,
    pub changed: bool,
}

impl UpdateOutcome {
    pub fn unchanged(object: ManagedObject) -> Self { Self { object, changed: false } }

    pub fn changed(object: ManagedObject) -> Self { Self { object, changed: true } }
}

/// A resource kind managed by the engine.
///
/// Hooks are stateless apart from what they capture at construction (target
/// namespace, owner reference, label set).
#[async_trait]
pub trait Hook: Send + Sync {
    /// Display name for logs, signals and metrics.
    fn kind(&self) -> &str;

    fn resource_name(&self) -> &str;

    fn namespace(&self) -> Option<&str>;

    /// The complete desired object; used on create.
    fn build_full_desired(&self) -> Result<ManagedObject>;

    /// Zero-value object of the right kind and identity.
    fn build_empty_template(&self) -> ManagedObject;

    /// Bring `existing` in line with the desired state.
    ///
    /// When a change is needed the hook writes it to the store itself (some kinds
    /// need field-specific merges, e.g. keeping a store-assigned address) and
    /// returns the stored object with `changed = true`. Must be idempotent: a
    /// second call without external changes reports `changed = false`.
    async fn update_existing(&self, req: &Request, store: &dyn ObjectStore, existing: ManagedObject) -> Result<UpdateOutcome>;

    /// False when the object must not exist, e.g. its feature is switched off.
    /// The engine then deletes it (if it carries our managed-by label) and
    /// drops it from the related-object list instead of converging it.
    fn wanted(&self) -> bool { true }

    /// Store address of the managed object.
    fn object_key(&self) -> Result<ObjectKey> {
        let template = self.build_empty_template();
        let types = template
            .types
            .ok_or_else(|| Error::hook_logic(format!("{}: empty template carries no apiVersion/kind", self.kind())))?;
        Ok(ObjectKey::new(types.api_version, types.kind, self.namespace(), self.resource_name()))
    }
}

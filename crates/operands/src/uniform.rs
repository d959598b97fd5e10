//! Hook for kinds reconciled uniformly: managed labels, owner references and a
//! fixed set of controlled top-level fields (`spec`, `data`, `rules`, ...).

use async_trait::async_trait;
use keel_core::{metadata, ManagedObject, ManagedObjectExt};
use keel_engine::{Error, Hook, Request, Result, UpdateOutcome};
use keel_store::ObjectStore;
use tracing::debug;

/// Top-level keys that are never controlled.
const RESERVED: &[&str] = &["apiVersion", "kind", "metadata", "status"];

pub struct UniformHook {
    desired: ManagedObject,
    kind: String,
    name: String,
    controlled: Vec<String>,
}

impl UniformHook {
    /// Hook controlling exactly the listed top-level fields of `desired`.
    pub fn new<S: Into<String>>(desired: ManagedObject, controlled: impl IntoIterator<Item = S>) -> Result<Self> {
        let key = desired.key().ok_or_else(|| Error::hook_logic("desired object needs apiVersion, kind and name"))?;
        let controlled = controlled.into_iter().map(Into::into).filter(|f: &String| !RESERVED.contains(&f.as_str())).collect();
        Ok(Self { desired, kind: key.kind, name: key.name, controlled })
    }

    /// Hook controlling every top-level field the desired object carries.
    pub fn from_manifest(desired: ManagedObject) -> Result<Self> {
        let fields: Vec<String> = desired.data.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default();
        Self::new(desired, fields)
    }

    pub fn controlled_fields(&self) -> &[String] { &self.controlled }

    /// Copy the controlled fields of the desired object onto `existing`.
    /// Returns true if any of them differed.
    fn merge_fields(&self, existing: &mut ManagedObject) -> bool {
        let mut changed = false;
        for f in &self.controlled {
            let want = self.desired.field(f);
            if existing.field(f) == want {
                continue;
            }
            changed = true;
            match want {
                Some(v) => existing.set_field(f, v.clone()),
                None => {
                    if let Some(map) = existing.data.as_object_mut() {
                        map.remove(f);
                    }
                }
            }
        }
        changed
    }
}

#[async_trait]
impl Hook for UniformHook {
    fn kind(&self) -> &str { &self.kind }

    fn resource_name(&self) -> &str { &self.name }

    fn namespace(&self) -> Option<&str> { self.desired.metadata.namespace.as_deref() }

    fn build_full_desired(&self) -> Result<ManagedObject> { Ok(self.desired.clone()) }

    fn build_empty_template(&self) -> ManagedObject {
        let mut obj = self.desired.clone();
        obj.metadata = Default::default();
        obj.metadata.name = self.desired.metadata.name.clone();
        obj.metadata.namespace = self.desired.metadata.namespace.clone();
        obj.data = serde_json::Value::Object(Default::default());
        obj
    }

    async fn update_existing(&self, req: &Request, store: &dyn ObjectStore, mut existing: ManagedObject) -> Result<UpdateOutcome> {
        let meta_changed = metadata::update_common_details(&self.desired.metadata, &mut existing.metadata);
        let fields_changed = self.merge_fields(&mut existing);
        if !meta_changed && !fields_changed {
            return Ok(UpdateOutcome::unchanged(existing));
        }
        debug!(kind = %self.kind, name = %self.name, meta_changed, fields_changed, "writing back");
        let stored = req.bounded(store.update(&existing)).await?;
        Ok(UpdateOutcome::changed(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DesiredObject;
    use keel_core::LabelSet;
    use keel_engine::CancellationToken;
    use keel_store::{MemoryStore, Verb};
    use serde_json::json;

    fn desired() -> ManagedObject {
        DesiredObject::new("networking.k8s.io/v1", "NetworkPolicy", Some("ns"), "allow-egress")
            .component(&LabelSet::default(), "network")
            .field("spec", json!({"podSelector": {}, "policyTypes": ["Egress"]}))
            .build()
    }

    #[test]
    fn reserved_fields_are_never_controlled() {
        let mut obj = desired();
        obj.set_field("status", json!({"ok": true}));
        let hook = UniformHook::from_manifest(obj).unwrap();
        assert_eq!(hook.controlled_fields(), &["spec".to_string()]);
    }

    #[test]
    fn needs_identity() {
        let mut obj = desired();
        obj.metadata.name = None;
        assert!(matches!(UniformHook::from_manifest(obj), Err(Error::HookLogic(_))));
    }

    #[tokio::test]
    async fn uncontrolled_fields_and_user_labels_survive() {
        let mut existing = desired();
        existing.set_field("spec", json!({"podSelector": {"x": 1}}));
        existing.set_field("status", json!({"seen": 3}));
        existing.labels_mut().insert("userKey".into(), "userVal".into());
        let store = MemoryStore::with_objects([existing]).unwrap();
        let stored = store.object(&desired().key().unwrap()).unwrap();

        let hook = UniformHook::from_manifest(desired()).unwrap();
        let req = Request::new(CancellationToken::new());
        let out = hook.update_existing(&req, &store, stored).await.unwrap();
        assert!(out.changed);
        assert_eq!(out.object.field("spec"), desired().field("spec"));
        assert_eq!(out.object.field("status"), Some(&json!({"seen": 3})));
        assert_eq!(out.object.label("userKey"), Some("userVal"));

        let again = hook.update_existing(&req, &store, out.object).await.unwrap();
        assert!(!again.changed);
        assert_eq!(store.calls(Verb::Update), 1);
    }

    #[tokio::test]
    async fn controlled_field_missing_from_desired_is_removed() {
        let mut existing = desired();
        existing.set_field("extra", json!("x"));
        let store = MemoryStore::with_objects([existing.clone()]).unwrap();
        let stored = store.object(&existing.key().unwrap()).unwrap();

        let hook = UniformHook::new(desired(), ["spec", "extra"]).unwrap();
        let out = hook.update_existing(&Request::new(CancellationToken::new()), &store, stored).await.unwrap();
        assert!(out.changed);
        assert!(out.object.field("extra").is_none());
    }
}

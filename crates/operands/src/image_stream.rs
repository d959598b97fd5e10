//! ImageStream hook. The tag list is a keyed sublist: per tag, the import source
//! (`from.kind`, `from.name`) and the import policy are controlled, everything
//! else (annotations, `from.uid`, generation, reference policy) is kept.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use keel_core::sublist::{merge_keyed, KeyedEntry};
use keel_core::{metadata, LabelSet, ManagedObject, ManagedObjectExt};
use keel_engine::{Error, Hook, Request, Result, UpdateOutcome};
use keel_store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use crate::builder::DesiredObject;

pub const API_VERSION: &str = "image.openshift.io/v1";
pub const KIND: &str = "ImageStream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSource {
    #[serde(default)]
    pub kind: String,
    pub name: String,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

/// Unset flags read as false, so the `importPolicy: {}` the store fills in
/// equals a tag that never set a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagImportPolicy {
    #[serde(default, skip_serializing_if = "is_false")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scheduled: bool,
    /// Empty leaves the store's default mode in place.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub import_mode: String,
}

fn is_false(b: &bool) -> bool { !*b }

impl TagImportPolicy {
    fn reconcile(&mut self, desired: &Self) -> bool {
        let mode_differs = !desired.import_mode.is_empty() && self.import_mode != desired.import_mode;
        if self.insecure == desired.insecure && self.scheduled == desired.scheduled && !mode_differs {
            return false;
        }
        self.insecure = desired.insecure;
        self.scheduled = desired.scheduled;
        if mode_differs {
            self.import_mode = desired.import_mode.clone();
        }
        true
    }
}

/// One entry of `spec.tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TagSource>,
    #[serde(default)]
    pub import_policy: TagImportPolicy,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

impl TagReference {
    /// Tag importing a registry image.
    pub fn docker_image(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            from: Some(TagSource { kind: "DockerImage".into(), name: image.to_string(), rest: Map::new() }),
            import_policy: TagImportPolicy::default(),
            rest: Map::new(),
        }
    }

    pub fn with_import_policy(mut self, policy: TagImportPolicy) -> Self {
        self.import_policy = policy;
        self
    }

    fn source(&self) -> Option<(&str, &str)> { self.from.as_ref().map(|f| (f.kind.as_str(), f.name.as_str())) }
}

impl KeyedEntry for TagReference {
    fn key(&self) -> &str { &self.name }

    fn reconcile_controlled(&mut self, desired: &Self) -> bool {
        let mut changed = false;
        if self.source() != desired.source() {
            match (&mut self.from, &desired.from) {
                (Some(have), Some(want)) => {
                    have.kind = want.kind.clone();
                    have.name = want.name.clone();
                }
                (slot, want) => *slot = want.clone(),
            }
            changed = true;
        }
        changed |= self.import_policy.reconcile(&desired.import_policy);
        changed
    }
}

pub struct ImageStreamHook {
    namespace: String,
    name: String,
    tags: Vec<TagReference>,
    labels: LabelSet,
    owner: Option<OwnerReference>,
    enabled: bool,
}

impl ImageStreamHook {
    pub fn new(labels: LabelSet, namespace: &str, name: &str, tags: Vec<TagReference>) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string(), tags, labels, owner: None, enabled: true }
    }

    /// A disabled image stream is removed from the store instead of converged.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn owned_by(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner = owner;
        self
    }

    /// Hook for an ImageStream given as a dynamic object (e.g. from a manifest).
    pub fn from_object(labels: LabelSet, desired: &ManagedObject) -> Result<Self> {
        let key = desired.key().ok_or_else(|| Error::hook_logic("ImageStream needs a name"))?;
        let namespace = key.namespace.ok_or_else(|| Error::hook_logic("ImageStream needs a namespace"))?;
        let tags = read_tags(desired)?.unwrap_or_default();
        let owner = desired.metadata.owner_references.as_ref().and_then(|o| o.first().cloned());
        Ok(Self::new(labels, &namespace, &key.name, tags).owned_by(owner))
    }

    fn desired(&self) -> Result<ManagedObject> {
        let tags = serde_json::to_value(&self.tags).map_err(|e| Error::hook_logic(format!("can't encode tags: {e}")))?;
        Ok(DesiredObject::new(API_VERSION, KIND, Some(&self.namespace), &self.name)
            .component(&self.labels, "compute")
            .owned_by(self.owner.clone())
            .field("spec", serde_json::json!({ "tags": tags }))
            .build())
    }
}

fn read_tags(obj: &ManagedObject) -> Result<Option<Vec<TagReference>>> {
    match obj.field("spec").and_then(|s| s.get("tags")) {
        None | Some(Json::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| Error::hook_logic(format!("can't convert ImageStream tags: {e}"))),
    }
}

#[async_trait]
impl Hook for ImageStreamHook {
    fn kind(&self) -> &str { KIND }

    fn resource_name(&self) -> &str { &self.name }

    fn namespace(&self) -> Option<&str> { Some(&self.namespace) }

    fn wanted(&self) -> bool { self.enabled }

    fn build_full_desired(&self) -> Result<ManagedObject> { self.desired() }

    fn build_empty_template(&self) -> ManagedObject { keel_core::managed_object(API_VERSION, KIND, Some(&self.namespace), &self.name) }

    async fn update_existing(&self, req: &Request, store: &dyn ObjectStore, mut existing: ManagedObject) -> Result<UpdateOutcome> {
        if !self.labels.is_controlled(&existing.metadata) {
            debug!(name = %self.name, "ImageStream is not managed by us; leaving it alone");
            return Ok(UpdateOutcome::unchanged(existing));
        }
        let desired = self.desired()?;
        let current = read_tags(&existing)?;
        let merge = merge_keyed(&self.tags, current.as_deref());
        let meta_changed = metadata::update_common_details(&desired.metadata, &mut existing.metadata);
        if !merge.changed() && !meta_changed {
            return Ok(UpdateOutcome::unchanged(existing));
        }
        if merge.changed() {
            info!(
                name = %self.name,
                added = merge.added,
                updated = merge.updated,
                removed = merge.removed,
                "reconciling ImageStream tags"
            );
            let tags = serde_json::to_value(&merge.entries).map_err(|e| Error::hook_logic(format!("can't encode tags: {e}")))?;
            let mut spec = match existing.field("spec") {
                Some(Json::Object(m)) => m.clone(),
                _ => Map::new(),
            };
            spec.insert("tags".into(), tags);
            existing.set_field("spec", Json::Object(spec));
        }
        let stored = req.bounded(store.update(&existing)).await?;
        Ok(UpdateOutcome::changed(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::labels::LABEL_MANAGED_BY;
    use keel_engine::CancellationToken;
    use keel_store::{MemoryStore, Verb};
    use serde_json::json;

    fn names(tags: &[TagReference]) -> Vec<(&str, &str)> {
        tags.iter().map(|t| (t.name.as_str(), t.from.as_ref().map(|f| f.name.as_str()).unwrap_or(""))).collect()
    }

    #[test]
    fn tag_list_follows_desired() {
        let desired = vec![TagReference::docker_image("v1", "img:v1"), TagReference::docker_image("latest", "img:v1")];
        let existing = vec![TagReference::docker_image("v1", "img:old"), TagReference::docker_image("v2", "img:v2")];
        let merge = merge_keyed(&desired, Some(existing.as_slice()));
        assert_eq!(names(&merge.entries), vec![("v1", "img:v1"), ("latest", "img:v1")]);
        assert!(merge.changed());
    }

    #[test]
    fn same_tags_in_other_order_are_no_op() {
        let desired = vec![TagReference::docker_image("a", "img:a"), TagReference::docker_image("b", "img:b")];
        let existing = vec![desired[1].clone(), desired[0].clone()];
        assert!(!merge_keyed(&desired, Some(existing.as_slice())).changed());
    }

    #[test]
    fn uncontrolled_tag_fields_are_preserved() {
        let want = TagReference::docker_image("v1", "img:v1").with_import_policy(TagImportPolicy { scheduled: true, ..Default::default() });
        let have: TagReference = serde_json::from_value(json!({
            "name": "v1",
            "annotations": {"note": "keep"},
            "from": {"kind": "DockerImage", "name": "img:old", "uid": "abc"},
            "generation": 3,
            "referencePolicy": {"type": "Source"}
        }))
        .unwrap();
        let merge = merge_keyed(&[want], Some(&[have][..]));
        assert_eq!(merge.updated, 1);

        let out = serde_json::to_value(&merge.entries[0]).unwrap();
        assert_eq!(out["from"], json!({"kind": "DockerImage", "name": "img:v1", "uid": "abc"}));
        assert_eq!(out["importPolicy"], json!({"scheduled": true}));
        assert_eq!(out["annotations"], json!({"note": "keep"}));
        assert_eq!(out["generation"], json!(3));
        assert_eq!(out["referencePolicy"], json!({"type": "Source"}));
    }

    fn hook() -> ImageStreamHook {
        ImageStreamHook::new(
            LabelSet::default(),
            "openshift-virtualization-os-images",
            "centos-stream9",
            vec![TagReference::docker_image("latest", "quay.io/containerdisks/centos-stream:9")],
        )
    }

    fn seeded(store: &MemoryStore, tags: Json, managed_by: &str) -> ManagedObject {
        let mut obj = hook().build_full_desired().unwrap();
        obj.set_field("spec", json!({"tags": tags, "lookupPolicy": {"local": false}}));
        obj.labels_mut().insert(LABEL_MANAGED_BY.into(), managed_by.into());
        store.insert(obj).unwrap()
    }

    #[tokio::test]
    async fn stale_tags_are_rewritten_keeping_other_spec_fields() {
        let store = MemoryStore::new();
        let existing = seeded(&store, json!([{"name": "latest", "from": {"kind": "DockerImage", "name": "old"}}, {"name": "extra", "from": {"kind": "DockerImage", "name": "x"}}]), "keel-operator");
        let req = Request::new(CancellationToken::new());
        let out = hook().update_existing(&req, &store, existing).await.unwrap();
        assert!(out.changed);

        let spec = out.object.field("spec").unwrap();
        assert_eq!(spec["lookupPolicy"], json!({"local": false}));
        let tags = read_tags(&out.object).unwrap().unwrap();
        assert_eq!(names(&tags), vec![("latest", "quay.io/containerdisks/centos-stream:9")]);

        let again = hook().update_existing(&req, &store, out.object).await.unwrap();
        assert!(!again.changed);
        assert_eq!(store.calls(Verb::Update), 1);
    }

    #[tokio::test]
    async fn store_filled_import_policy_converges() {
        let store = MemoryStore::new();
        let existing = seeded(
            &store,
            json!([{"name": "latest", "from": {"kind": "DockerImage", "name": "quay.io/containerdisks/centos-stream:9"}, "importPolicy": {"importMode": "Legacy"}}]),
            "keel-operator",
        );
        let req = Request::new(CancellationToken::new());
        let mut current = existing;
        for _ in 0..3 {
            let out = hook().update_existing(&req, &store, current).await.unwrap();
            assert!(!out.changed);
            current = out.object;
        }
        assert_eq!(store.calls(Verb::Update), 0);

        let empty: TagReference = serde_json::from_value(json!({"name": "latest", "importPolicy": {}})).unwrap();
        let unset: TagReference = serde_json::from_value(json!({"name": "latest"})).unwrap();
        assert_eq!(empty, unset);
    }

    #[test]
    fn import_policy_flags_are_controlled() {
        let want = TagReference::docker_image("v1", "img:v1").with_import_policy(TagImportPolicy { insecure: true, ..Default::default() });
        let mut have = TagReference::docker_image("v1", "img:v1");
        have.import_policy.import_mode = "PreserveOriginal".into();
        assert!(have.reconcile_controlled(&want));
        assert!(have.import_policy.insecure);
        assert_eq!(have.import_policy.import_mode, "PreserveOriginal");
        assert!(!have.reconcile_controlled(&want));
    }

    #[tokio::test]
    async fn foreign_image_streams_are_left_alone() {
        let store = MemoryStore::new();
        let existing = seeded(&store, json!([{"name": "other", "from": {"kind": "DockerImage", "name": "x"}}]), "somebody-else");
        let out = hook().update_existing(&Request::new(CancellationToken::new()), &store, existing.clone()).await.unwrap();
        assert!(!out.changed);
        assert_eq!(out.object.field("spec"), existing.field("spec"));
        assert_eq!(out.object.metadata.labels, existing.metadata.labels);
        assert_eq!(store.calls(Verb::Update), 0);
    }

    #[tokio::test]
    async fn malformed_tags_are_a_logic_error() {
        let store = MemoryStore::new();
        let existing = seeded(&store, json!("not-a-list"), "keel-operator");
        let err = hook().update_existing(&Request::new(CancellationToken::new()), &store, existing).await.unwrap_err();
        assert!(matches!(err, Error::HookLogic(_)));
    }

    #[test]
    fn from_object_reads_tags_and_owner() {
        let obj = hook().build_full_desired().unwrap();
        let back = ImageStreamHook::from_object(LabelSet::default(), &obj).unwrap();
        assert_eq!(back.tags, hook().tags);
        assert_eq!(back.namespace(), Some("openshift-virtualization-os-images"));
    }
}

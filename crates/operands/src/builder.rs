//! Helpers for putting desired objects together.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use keel_core::labels::LABEL_COMPONENT;
use keel_core::{managed_object, LabelSet, ManagedObject, ManagedObjectExt};
use keel_engine::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;

/// Fluent construction of a desired [`ManagedObject`].
#[derive(Debug, Clone)]
pub struct DesiredObject {
    obj: ManagedObject,
}

impl DesiredObject {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self { obj: managed_object(api_version, kind, namespace, name) }
    }

    /// Managed labels for `component`, overriding earlier values for the same keys.
    pub fn component(self, labels: &LabelSet, component: &str) -> Self { self.labels(labels.for_component(component)) }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.obj.labels_mut().extend(labels);
        self
    }

    pub fn owned_by(mut self, owner: Option<OwnerReference>) -> Self {
        self.obj.metadata.owner_references = owner.map(|o| vec![o]);
        self
    }

    pub fn field(mut self, name: &str, value: Json) -> Self {
        self.obj.set_field(name, value);
        self
    }

    pub fn build(self) -> ManagedObject { self.obj }
}

/// Add the managed labels to an object coming from a manifest. Labels the
/// manifest sets itself win; the component comes from the manifest when present.
pub fn stamp_labels(obj: &mut ManagedObject, labels: &LabelSet) {
    let component = obj.label(LABEL_COMPONENT).unwrap_or_default().to_string();
    let have = obj.labels_mut();
    for (k, v) in labels.for_component(&component) {
        have.entry(k).or_insert(v);
    }
}

/// Typed view of a dynamic object. A payload of the wrong shape is a hook
/// logic error.
pub fn to_typed<K: DeserializeOwned>(obj: &ManagedObject, kind: &str) -> Result<K> {
    let value = serde_json::to_value(obj).map_err(|e| Error::hook_logic(format!("can't encode {kind}: {e}")))?;
    serde_json::from_value(value).map_err(|e| Error::hook_logic(format!("can't convert to {kind}: {e}")))
}

pub fn to_managed<K: Serialize>(obj: &K, kind: &str) -> Result<ManagedObject> {
    let value = serde_json::to_value(obj).map_err(|e| Error::hook_logic(format!("can't encode {kind}: {e}")))?;
    serde_json::from_value(value).map_err(|e| Error::hook_logic(format!("can't convert {kind} to a dynamic object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use keel_core::labels::{LABEL_APP, LABEL_MANAGED_BY};
    use serde_json::json;

    #[test]
    fn builder_sets_identity_labels_owner_and_payload() {
        let owner = OwnerReference { api_version: "v1".into(), kind: "ConfigMap".into(), name: "o".into(), uid: "u1".into(), ..Default::default() };
        let obj = DesiredObject::new("v1", "ConfigMap", Some("ns"), "cm")
            .component(&LabelSet::default(), "monitoring")
            .owned_by(Some(owner.clone()))
            .field("data", json!({"a": "b"}))
            .build();
        assert_eq!(obj.key().unwrap().to_string(), "ConfigMap ns/cm");
        assert_eq!(obj.label(LABEL_COMPONENT), Some("monitoring"));
        assert_eq!(obj.metadata.owner_references, Some(vec![owner]));
        assert_eq!(obj.field("data"), Some(&json!({"a": "b"})));
    }

    #[test]
    fn stamping_keeps_manifest_labels() {
        let mut obj = DesiredObject::new("v1", "ConfigMap", Some("ns"), "cm")
            .labels([(LABEL_APP.to_string(), "mine".to_string()), (LABEL_COMPONENT.to_string(), "network".to_string())].into())
            .build();
        stamp_labels(&mut obj, &LabelSet::default());
        assert_eq!(obj.label(LABEL_APP), Some("mine"));
        assert_eq!(obj.label(LABEL_MANAGED_BY), Some("keel-operator"));
        assert_eq!(obj.label(LABEL_COMPONENT), Some("network"));
    }

    #[test]
    fn typed_conversion_both_ways() {
        let obj = DesiredObject::new("v1", "ConfigMap", Some("ns"), "cm").field("data", json!({"k": "v"})).build();
        let cm: ConfigMap = to_typed(&obj, "ConfigMap").unwrap();
        assert_eq!(cm.data.as_ref().and_then(|d| d.get("k")).map(String::as_str), Some("v"));
        let back = to_managed(&cm, "ConfigMap").unwrap();
        assert_eq!(back.key(), obj.key());
        assert_eq!(back.field("data"), obj.field("data"));
    }

    #[test]
    fn wrong_shape_is_hook_logic_error() {
        let obj = DesiredObject::new("v1", "ConfigMap", Some("ns"), "cm").field("data", json!(42)).build();
        let err = to_typed::<ConfigMap>(&obj, "ConfigMap").unwrap_err();
        assert!(matches!(err, Error::HookLogic(_)));
    }
}

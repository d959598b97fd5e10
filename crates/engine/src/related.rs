//! Related-object list: one reference per `(kind, namespace, name)` for every
//! object the engine produced or touched.

use k8s_openapi::api::core::v1::ObjectReference;
use keel_core::ManagedObject;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference record for a store object.
pub fn object_reference(obj: &ManagedObject) -> Result<ObjectReference> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::hook_logic("object has no apiVersion/kind; cannot reference it"))?;
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::hook_logic(format!("{} without metadata.name", types.kind)))?;
    Ok(ObjectReference {
        api_version: Some(types.api_version.clone()),
        kind: Some(types.kind.clone()),
        namespace: obj.metadata.namespace.clone(),
        name: Some(name),
        uid: obj.metadata.uid.clone(),
        resource_version: obj.metadata.resource_version.clone(),
        field_path: None,
    })
}

fn same_identity(r: &ObjectReference, kind: &str, namespace: Option<&str>, name: &str) -> bool {
    r.kind.as_deref() == Some(kind) && r.namespace.as_deref() == namespace && r.name.as_deref() == Some(name)
}

/// Order-stable list treated as a set keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelatedObjects(Vec<ObjectReference>);

impl RelatedObjects {
    pub fn new() -> Self { Self::default() }

    pub fn entries(&self) -> &[ObjectReference] { &self.0 }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn into_inner(self) -> Vec<ObjectReference> { self.0 }

    pub fn find(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<&ObjectReference> {
        self.0.iter().find(|r| same_identity(r, kind, namespace, name))
    }

    /// Insert or replace by identity. Returns true if the list changed.
    pub fn upsert(&mut self, reference: ObjectReference) -> bool {
        let kind = reference.kind.clone().unwrap_or_default();
        let name = reference.name.clone().unwrap_or_default();
        let pos = self.0.iter().position(|r| same_identity(r, &kind, reference.namespace.as_deref(), &name));
        match pos {
            Some(i) if self.0[i] == reference => false,
            Some(i) => {
                self.0[i] = reference;
                true
            }
            None => {
                self.0.push(reference);
                true
            }
        }
    }

    /// Track a store object. Returns true if the list changed.
    pub fn track(&mut self, obj: &ManagedObject) -> Result<bool> {
        Ok(self.upsert(object_reference(obj)?))
    }

    pub fn remove(&mut self, kind: &str, namespace: Option<&str>, name: &str) -> Option<ObjectReference> {
        let pos = self.0.iter().position(|r| same_identity(r, kind, namespace, name))?;
        Some(self.0.remove(pos))
    }
}

impl From<Vec<ObjectReference>> for RelatedObjects {
    fn from(v: Vec<ObjectReference>) -> Self { Self(v) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::managed_object;

    fn stored(kind: &str, ns: &str, name: &str, uid: &str, rv: &str) -> ManagedObject {
        let mut obj = managed_object("v1", kind, Some(ns), name);
        obj.metadata.uid = Some(uid.into());
        obj.metadata.resource_version = Some(rv.into());
        obj
    }

    #[test]
    fn upsert_appends_then_replaces() {
        let mut related = RelatedObjects::new();
        assert!(related.track(&stored("ConfigMap", "ns", "a", "u1", "1")).unwrap());
        assert!(related.track(&stored("Secret", "ns", "a", "u2", "1")).unwrap());
        assert_eq!(related.len(), 2);

        // unchanged reference is a no-op
        assert!(!related.track(&stored("ConfigMap", "ns", "a", "u1", "1")).unwrap());

        // recreated object: new uid replaces the entry in place
        assert!(related.track(&stored("ConfigMap", "ns", "a", "u3", "7")).unwrap());
        assert_eq!(related.len(), 2);
        let entry = &related.entries()[0];
        assert_eq!(entry.uid.as_deref(), Some("u3"));
        assert_eq!(entry.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn identity_includes_namespace() {
        let mut related = RelatedObjects::new();
        related.track(&stored("ConfigMap", "ns1", "a", "u1", "1")).unwrap();
        related.track(&stored("ConfigMap", "ns2", "a", "u2", "1")).unwrap();
        assert_eq!(related.len(), 2);
        assert!(related.remove("ConfigMap", Some("ns1"), "a").is_some());
        assert!(related.find("ConfigMap", Some("ns1"), "a").is_none());
        assert!(related.find("ConfigMap", Some("ns2"), "a").is_some());
    }

    #[test]
    fn untyped_objects_cannot_be_tracked() {
        let mut obj = stored("ConfigMap", "ns", "a", "u", "1");
        obj.types = None;
        assert!(RelatedObjects::new().track(&obj).is_err());
    }

    #[test]
    fn serializes_as_flat_list() {
        let mut related = RelatedObjects::new();
        related.track(&stored("ConfigMap", "ns", "a", "u1", "1")).unwrap();
        let json = serde_json::to_value(&related).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["kind"], "ConfigMap");
        let back: RelatedObjects = serde_json::from_value(json).unwrap();
        assert_eq!(back, related);
    }
}

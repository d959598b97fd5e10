//! Keel core types: object identity, store errors and the pure merge policies
//! shared by the engine and the operands.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod labels;
pub mod metadata;
pub mod sublist;

pub use error::StoreError;
pub use labels::LabelSet;

/// A store-resident object. Kind-tagged through `types`, payload in `data`.
pub type ManagedObject = DynamicObject;

/// Identity of a managed object inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(|s| s.to_string()),
            name: name.into(),
        }
    }

    /// Key of an object carrying type information and a name; `None` otherwise.
    pub fn of(obj: &ManagedObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let name = obj.metadata.name.as_deref().filter(|n| !n.is_empty())?;
        Some(Self::new(&types.api_version, &types.kind, obj.metadata.namespace.as_deref(), name))
    }

    /// Same `(kind, namespace, name)` triple; the api version is not part of identity.
    pub fn same_identity(&self, other: &ObjectKey) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), self.api_version.clone()),
        };
        GroupVersionKind { group, version, kind: self.kind.clone() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Build an object shell with type information and identity, payload empty.
pub fn managed_object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> ManagedObject {
    DynamicObject {
        types: Some(TypeMeta { api_version: api_version.to_string(), kind: kind.to_string() }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(|s| s.to_string()),
            ..Default::default()
        },
        data: serde_json::Value::Object(serde_json::Map::new()),
    }
}

/// Accessors used across the workspace.
pub trait ManagedObjectExt {
    fn key(&self) -> Option<ObjectKey>;
    fn kind(&self) -> Option<&str>;
    fn api_version(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn label(&self, key: &str) -> Option<&str>;
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String>;
    /// Top-level payload field (`spec`, `data`, `rules`, ...).
    fn field(&self, name: &str) -> Option<&serde_json::Value>;
    fn set_field(&mut self, name: &str, value: serde_json::Value);
}

impl ManagedObjectExt for ManagedObject {
    fn key(&self) -> Option<ObjectKey> { ObjectKey::of(self) }

    fn kind(&self) -> Option<&str> { self.types.as_ref().map(|t| t.kind.as_str()) }

    fn api_version(&self) -> Option<&str> { self.types.as_ref().map(|t| t.api_version.as_str()) }

    fn uid(&self) -> Option<&str> { self.metadata.uid.as_deref() }

    fn resource_version(&self) -> Option<&str> { self.metadata.resource_version.as_deref() }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.as_ref().and_then(|l| l.get(key)).map(|s| s.as_str())
    }

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata.labels.get_or_insert_with(BTreeMap::new)
    }

    fn field(&self, name: &str) -> Option<&serde_json::Value> { self.data.get(name) }

    fn set_field(&mut self, name: &str, value: serde_json::Value) {
        if !self.data.is_object() {
            self.data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = self.data.as_object_mut() {
            obj.insert(name.to_string(), value);
        }
    }
}

//! Multi-document YAML manifests of desired objects.

use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use keel_core::{ManagedObject, ObjectKey};
use serde::Deserialize;

/// Parse every non-empty document. Objects without a namespace get `default_ns`
/// when one is given.
pub fn parse(text: &str, default_ns: Option<&str>) -> Result<Vec<ManagedObject>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(doc).with_context(|| format!("document {}: invalid YAML", i + 1))?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value).with_context(|| format!("document {}: not representable as JSON", i + 1))?;
        let mut obj: ManagedObject = serde_json::from_value(json).with_context(|| format!("document {}: not an object", i + 1))?;
        if obj.types.is_none() {
            bail!("document {}: missing apiVersion/kind", i + 1);
        }
        if obj.metadata.name.as_deref().map_or(true, str::is_empty) {
            bail!("document {}: missing metadata.name", i + 1);
        }
        if obj.metadata.namespace.is_none() {
            obj.metadata.namespace = default_ns.map(str::to_string);
        }
        out.push(obj);
    }
    Ok(out)
}

/// Parse `apiVersion/Kind/name`, e.g. `apps/v1/Deployment/keel-operator` or
/// `v1/ConfigMap/settings`.
pub fn parse_target(s: &str, namespace: Option<&str>) -> Result<ObjectKey> {
    let parts: Vec<&str> = s.split('/').collect();
    let (api_version, kind, name) = match parts.as_slice() {
        [version, kind, name] => ((*version).to_string(), *kind, *name),
        [group, version, kind, name] => (format!("{}/{}", group, version), *kind, *name),
        _ => return Err(anyhow!("expected apiVersion/Kind/name, got {:?}", s)),
    };
    if kind.is_empty() || name.is_empty() {
        bail!("expected apiVersion/Kind/name, got {:?}", s);
    }
    Ok(ObjectKey::new(api_version, kind, namespace, name))
}

pub fn reference_to(key: &ObjectKey) -> ObjectReference {
    ObjectReference {
        api_version: Some(key.api_version.clone()),
        kind: Some(key.kind.clone()),
        namespace: key.namespace.clone(),
        name: Some(key.name.clone()),
        ..Default::default()
    }
}

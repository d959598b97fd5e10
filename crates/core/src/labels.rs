//! Standard label set stamped on every managed object.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const LABEL_APP: &str = "app";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";

/// Values for the managed label keys. Passed in explicitly; there is no
/// process-wide registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pub app: String,
    pub managed_by: String,
    pub part_of: String,
    /// Empty means the version label is not managed.
    pub version: String,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            app: "keel".into(),
            managed_by: "keel-operator".into(),
            part_of: "keel".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl LabelSet {
    /// Managed labels for an object belonging to `component`.
    pub fn for_component(&self, component: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(LABEL_APP.to_string(), self.app.clone());
        out.insert(LABEL_MANAGED_BY.to_string(), self.managed_by.clone());
        out.insert(LABEL_PART_OF.to_string(), self.part_of.clone());
        if !component.is_empty() {
            out.insert(LABEL_COMPONENT.to_string(), component.to_string());
        }
        if !self.version.is_empty() {
            out.insert(LABEL_VERSION.to_string(), self.version.clone());
        }
        out
    }

    /// Whether an existing object carries our managed-by marker.
    pub fn is_controlled(&self, meta: &ObjectMeta) -> bool {
        meta.labels
            .as_ref()
            .and_then(|l| l.get(LABEL_MANAGED_BY))
            .is_some_and(|v| *v == self.managed_by)
    }
}

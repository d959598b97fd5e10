//! Service hook. Only labels, selector and ports are compared: the store fills
//! in `clusterIP`, `ipFamilies` and friends, so a whole-spec comparison would
//! never converge.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use keel_core::{managed_object, metadata, ManagedObject};
use keel_engine::{Hook, Request, Result, UpdateOutcome};
use keel_store::ObjectStore;
use tracing::info;

use crate::builder::{to_managed, to_typed};

const KIND: &str = "Service";

pub struct ServiceHook {
    desired: Service,
    name: String,
}

impl ServiceHook {
    pub fn new(desired: Service) -> Self {
        let name = desired.metadata.name.clone().unwrap_or_default();
        Self { desired, name }
    }

    pub fn from_object(desired: &ManagedObject) -> Result<Self> { Ok(Self::new(to_typed(desired, KIND)?)) }

    fn has_right_fields(&self, found: &Service) -> bool {
        let want = self.desired.spec.as_ref();
        let have = found.spec.as_ref();
        metadata::labels_match(&self.desired.metadata, &found.metadata)
            && want.and_then(|s| s.selector.as_ref()) == have.and_then(|s| s.selector.as_ref())
            && want.and_then(|s| s.ports.as_ref()) == have.and_then(|s| s.ports.as_ref())
    }
}

#[async_trait]
impl Hook for ServiceHook {
    fn kind(&self) -> &str { KIND }

    fn resource_name(&self) -> &str { &self.name }

    fn namespace(&self) -> Option<&str> { self.desired.metadata.namespace.as_deref() }

    fn build_full_desired(&self) -> Result<ManagedObject> { to_managed(&self.desired, KIND) }

    fn build_empty_template(&self) -> ManagedObject { managed_object("v1", KIND, self.namespace(), &self.name) }

    async fn update_existing(&self, req: &Request, store: &dyn ObjectStore, existing: ManagedObject) -> Result<UpdateOutcome> {
        let mut found: Service = to_typed(&existing, KIND)?;
        if self.has_right_fields(&found) {
            return Ok(UpdateOutcome::unchanged(existing));
        }
        if req.operator_triggered {
            info!(name = %self.name, "updating existing Service spec to new opinionated values");
        } else {
            info!(name = %self.name, "reconciling an externally updated Service spec to its opinionated values");
        }
        metadata::merge_labels(&self.desired.metadata, &mut found.metadata);
        let assigned = found.spec.take().unwrap_or_default();
        found.spec = Some(ServiceSpec {
            cluster_ip: assigned.cluster_ip,
            cluster_ips: assigned.cluster_ips,
            ..self.desired.spec.clone().unwrap_or_default()
        });
        let stored = req.bounded(store.update(&to_managed(&found, KIND)?)).await?;
        Ok(UpdateOutcome::changed(stored))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use k8s_openapi::api::core::v1::ServicePort;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use keel_core::{LabelSet, ManagedObjectExt};
    use keel_engine::{CancellationToken, Error};
    use keel_store::{MemoryStore, Verb};
    use serde_json::json;

    fn svc(port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("kubevirt-metrics".into()),
                namespace: Some("kubevirt".into()),
                labels: Some(LabelSet::default().for_component("monitoring")),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), "keel".to_string())])),
                ports: Some(vec![ServicePort {
                    name: Some("http-metrics".into()),
                    port,
                    protocol: Some("TCP".into()),
                    target_port: Some(IntOrString::Int(8443)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn assigned(port: i32) -> ManagedObject {
        let mut obj = to_managed(&svc(port), KIND).unwrap();
        let spec = obj.data.get_mut("spec").and_then(|s| s.as_object_mut()).unwrap();
        spec.insert("clusterIP".into(), json!("10.0.0.7"));
        spec.insert("clusterIPs".into(), json!(["10.0.0.7"]));
        spec.insert("sessionAffinity".into(), json!("None"));
        obj
    }

    #[tokio::test]
    async fn store_defaults_do_not_count_as_drift() {
        let store = MemoryStore::with_objects([assigned(8443)]).unwrap();
        let hook = ServiceHook::new(svc(8443));
        let existing = store.object(&hook.object_key().unwrap()).unwrap();
        let out = hook.update_existing(&Request::new(CancellationToken::new()), &store, existing).await.unwrap();
        assert!(!out.changed);
        assert_eq!(store.calls(Verb::Update), 0);
    }

    #[tokio::test]
    async fn port_drift_is_fixed_and_cluster_ip_kept() {
        let store = MemoryStore::with_objects([assigned(9999)]).unwrap();
        let hook = ServiceHook::new(svc(8443));
        let existing = store.object(&hook.object_key().unwrap()).unwrap();
        let req = Request::new(CancellationToken::new());
        let out = hook.update_existing(&req, &store, existing).await.unwrap();
        assert!(out.changed);

        let spec = out.object.field("spec").unwrap();
        assert_eq!(spec["clusterIP"], json!("10.0.0.7"));
        assert_eq!(spec["clusterIPs"], json!(["10.0.0.7"]));
        assert_eq!(spec["ports"][0]["port"], json!(8443));
        assert!(spec.get("sessionAffinity").is_none());

        let again = hook.update_existing(&req, &store, out.object).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn wrong_kind_is_a_logic_error() {
        let store = MemoryStore::new();
        let hook = ServiceHook::new(svc(8443));
        let cm = managed_object("v1", "ConfigMap", Some("kubevirt"), "kubevirt-metrics");
        let err = hook.update_existing(&Request::new(CancellationToken::new()), &store, cm).await.unwrap_err();
        assert!(matches!(err, Error::HookLogic(_)));
    }
}

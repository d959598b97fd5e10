//! Drives the registered hooks through one reconciliation pass, in registration
//! order, and feeds the related-object list.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use keel_core::{managed_object, metadata, ManagedObject, ManagedObjectExt, ObjectKey};
use keel_store::ObjectStore;
use metrics::histogram;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::drift::DriftCounter;
use crate::error::{Error, Result};
use crate::hook::Hook;
use crate::reconcile::{Engine, ReconcileResult};
use crate::request::Request;
use crate::signal::EventSink;

#[derive(Debug)]
pub struct HookReport {
    pub kind: String,
    pub name: String,
    pub result: ReconcileResult,
}

#[derive(Debug, Default)]
pub struct PassReport {
    /// One entry per attempted hook, in registration order.
    pub hooks: Vec<HookReport>,
    /// Hooks skipped after a fail-fast abort or cancellation.
    pub skipped: usize,
    /// The related-object list changed during this pass.
    pub related_changed: bool,
    /// Namespace preparation failed; no hook ran.
    pub setup_error: Option<Error>,
}

impl PassReport {
    pub fn first_error(&self) -> Option<&Error> {
        self.setup_error.as_ref().or_else(|| self.hooks.iter().find_map(|h| h.result.error.as_ref()))
    }

    pub fn is_success(&self) -> bool { self.skipped == 0 && self.first_error().is_none() }

    pub fn created(&self) -> usize { self.hooks.iter().filter(|h| h.result.created).count() }

    pub fn updated(&self) -> usize { self.hooks.iter().filter(|h| h.result.updated).count() }

    /// The first fatal error, if any; the report otherwise.
    pub fn into_result(mut self) -> Result<Self> {
        if let Some(err) = self.setup_error.take() {
            return Err(err);
        }
        match self.hooks.iter_mut().find_map(|h| h.result.error.take()) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn ObjectStore>,
    engine: Engine,
    hooks: Vec<Box<dyn Hook>>,
    /// Last object per hook from the previous pass; `None` where it failed or
    /// the hook's object is not wanted.
    latest: Vec<Option<ManagedObject>>,
    first_loop: bool,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>, events: Arc<dyn EventSink>, drift: Arc<dyn DriftCounter>) -> Self {
        Self { config, store, engine: Engine::new(events, drift), hooks: Vec::new(), latest: Vec::new(), first_loop: true }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn register(&mut self, hook: impl Hook + 'static) -> &mut Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn register_boxed(&mut self, hook: Box<dyn Hook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn hooks(&self) -> impl Iterator<Item = &dyn Hook> { self.hooks.iter().map(|h| h.as_ref()) }

    /// True until the first pass has run.
    pub fn is_first_loop(&self) -> bool { self.first_loop }

    pub fn latest_objects(&self) -> &[Option<ManagedObject>] { &self.latest }

    /// Replace the registered hooks, keeping the per-position history of the
    /// previous pass. Used when the desired targets change between passes, e.g.
    /// after a namespace move.
    pub fn set_hooks(&mut self, hooks: Vec<Box<dyn Hook>>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    /// Run every hook once. A failing hook does not stop the pass unless
    /// `fail_fast` is set; cancellation always stops it.
    pub async fn run_pass(&mut self, req: &mut Request) -> PassReport {
        let started = Instant::now();
        if req.call_timeout.is_none() {
            req.call_timeout = self.config.store_timeout;
        }
        let mut report = PassReport::default();
        if self.config.ensure_namespaces {
            if let Err(err) = self.ensure_namespaces(req).await {
                error!(error = %err, "cannot prepare target namespaces; skipping the pass");
                report.skipped = self.hooks.len();
                report.setup_error = Some(err);
                return report;
            }
        }

        let targets: Vec<ObjectKey> = self.hooks.iter().filter(|h| h.wanted()).filter_map(|h| h.object_key().ok()).collect();
        let mut objects: Vec<Option<ManagedObject>> = vec![None; self.hooks.len()];
        let mut untracked = false;

        for (i, hook) in self.hooks.iter().enumerate() {
            let result = if hook.wanted() {
                self.engine.reconcile(self.store.as_ref(), req, hook.as_ref(), self.first_loop).await
            } else {
                self.engine.remove(self.store.as_ref(), req, hook.as_ref(), &self.config.labels).await
            };
            if result.is_ok() {
                if let Ok(target) = hook.object_key() {
                    if !hook.wanted() {
                        untracked |= untrack(req, &target);
                    } else if let Some(prev) = self.latest.get(i).and_then(Option::as_ref).and_then(|o| o.key()) {
                        if moved(&prev, &target) && !targets.iter().any(|t| t.same_identity(&prev)) {
                            info!(from = %prev, to = %target, "object moved to another namespace; untracking the old placement");
                            untracked |= untrack(req, &prev);
                        }
                    }
                }
            }
            objects[i] = result.object.clone();
            let stop = match &result.error {
                Some(err) => self.config.fail_fast || err.is_cancelled(),
                None => false,
            };
            report.hooks.push(HookReport { kind: hook.kind().to_string(), name: hook.resource_name().to_string(), result });
            if stop {
                report.skipped = self.hooks.len() - i - 1;
                warn!(skipped = report.skipped, "aborting reconciliation pass");
                break;
            }
        }

        self.latest = objects;
        self.first_loop = false;
        let upserted = self.update_related_objects(req);
        report.related_changed = upserted || untracked;
        histogram!("reconcile_pass_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            hooks = report.hooks.len(),
            created = report.created(),
            updated = report.updated(),
            deleted = report.hooks.iter().filter(|h| h.result.deleted).count(),
            failed = report.hooks.iter().filter(|h| !h.result.is_ok()).count(),
            "reconciliation pass done"
        );
        report
    }

    /// Upsert the latest objects into the request's related-object list. Hooks
    /// without an object keep whatever entry they had. Returns true on change.
    pub fn update_related_objects(&self, req: &mut Request) -> bool {
        let mut changed = false;
        for obj in self.latest.iter().flatten() {
            match req.related_objects.track(obj) {
                Ok(c) => changed |= c,
                Err(e) => warn!(error = %e, "cannot reference object; not tracked"),
            }
        }
        if changed {
            req.status_dirty = true;
        }
        changed
    }

    /// Make sure every namespace a wanted hook targets exists and carries the
    /// configured namespace labels. Missing namespaces are created with the
    /// managed labels; existing ones only get the configured labels merged in.
    async fn ensure_namespaces(&self, req: &Request) -> Result<()> {
        let mut namespaces: Vec<&str> = self.hooks.iter().filter(|h| h.wanted()).filter_map(|h| h.namespace()).collect();
        namespaces.sort_unstable();
        namespaces.dedup();

        let mut desired = ObjectMeta::default();
        if !self.config.namespace_labels.is_empty() {
            desired.labels = Some(self.config.namespace_labels.clone());
        }
        for ns in namespaces {
            let key = ObjectKey::new("v1", "Namespace", None, ns);
            match req.bounded(self.store.get(&key)).await {
                Ok(mut existing) => {
                    if metadata::labels_match(&desired, &existing.metadata) {
                        continue;
                    }
                    metadata::merge_labels(&desired, &mut existing.metadata);
                    req.bounded(self.store.update(&existing)).await.map_err(|e| e.attribute("Namespace", ns))?;
                    info!(namespace = ns, "namespace labels updated");
                }
                Err(e) if e.is_not_found() => {
                    let mut obj = managed_object("v1", "Namespace", None, ns);
                    let mut labels = self.config.labels.for_component("");
                    labels.extend(self.config.namespace_labels.clone());
                    obj.metadata.labels = Some(labels);
                    req.bounded(self.store.create(&obj)).await.map_err(|e| e.attribute("Namespace", ns))?;
                    info!(namespace = ns, "namespace created");
                }
                Err(e) => return Err(e.attribute("Namespace", ns)),
            }
        }
        Ok(())
    }
}

/// Same kind and name, other namespace.
fn moved(prev: &ObjectKey, target: &ObjectKey) -> bool {
    prev.kind == target.kind && prev.name == target.name && prev.namespace != target.namespace
}

fn untrack(req: &mut Request, key: &ObjectKey) -> bool {
    let removed = req.related_objects.remove(&key.kind, key.namespace.as_deref(), &key.name).is_some();
    if removed {
        req.status_dirty = true;
    }
    removed
}

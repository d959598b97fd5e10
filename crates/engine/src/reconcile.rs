//! Create-or-update decision for a single hook, drift provenance and signaling.

use std::sync::Arc;

use keel_core::{LabelSet, ManagedObject};
use keel_store::ObjectStore;
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::drift::DriftCounter;
use crate::error::{Error, Result};
use crate::hook::Hook;
use crate::related::object_reference;
use crate::request::Request;
use crate::signal::{
    EventSink, Severity, Signal, REASON_CREATED, REASON_OVERWRITTEN, REASON_UNEXPECTED_ERROR, REASON_UPDATED,
};

/// Outcome of one hook in one pass.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub created: bool,
    pub updated: bool,
    /// The object of a hook that is not wanted was deleted.
    pub deleted: bool,
    /// The hook converged while the request was in upgrade mode. Never set on
    /// failure, so the driver can tell when every component reached the new
    /// version.
    pub upgraded: bool,
    pub error: Option<Error>,
    /// The object as last seen or written; `None` when the hook failed.
    pub object: Option<ManagedObject>,
}

impl ReconcileResult {
    fn failed(err: Error) -> Self { Self { error: Some(err), ..Default::default() } }

    pub fn is_ok(&self) -> bool { self.error.is_none() }
}

/// Who caused the drift that an update just corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The triggering event was the operator's own change.
    Operator,
    /// A resync or a foreign actor; the update overwrote somebody's edit.
    External,
}

impl Provenance {
    pub fn of(req: &Request) -> Self {
        if req.operator_triggered { Provenance::Operator } else { Provenance::External }
    }
}

pub struct Engine {
    events: Arc<dyn EventSink>,
    drift: Arc<dyn DriftCounter>,
}

impl Engine {
    pub fn new(events: Arc<dyn EventSink>, drift: Arc<dyn DriftCounter>) -> Self { Self { events, drift } }

    /// Reconcile one hook. Errors are attributed to the hook's kind and name and
    /// returned inside the result.
    pub async fn reconcile(&self, store: &dyn ObjectStore, req: &Request, hook: &dyn Hook, first_loop: bool) -> ReconcileResult {
        let (kind, name) = (hook.kind(), hook.resource_name());
        debug!(kind, name, ns = ?hook.namespace(), "reconciling");
        match self.converge(store, req, hook, first_loop).await {
            Ok(res) => res,
            Err(err) => self.failed(hook, err),
        }
    }

    /// Remove the object of a hook that is no longer wanted. Objects without our
    /// managed-by label are left in place.
    pub async fn remove(&self, store: &dyn ObjectStore, req: &Request, hook: &dyn Hook, labels: &LabelSet) -> ReconcileResult {
        debug!(kind = hook.kind(), name = hook.resource_name(), ns = ?hook.namespace(), "object not wanted");
        match self.retire(store, req, hook, labels).await {
            Ok(res) => res,
            Err(err) => self.failed(hook, err),
        }
    }

    fn failed(&self, hook: &dyn Hook, err: Error) -> ReconcileResult {
        let (kind, name) = (hook.kind(), hook.resource_name());
        counter!("reconcile_errors_total", 1u64, "kind" => kind.to_string());
        if err.is_cancelled() {
            warn!(kind, name, "reconciliation cancelled");
        } else {
            error!(kind, name, error = %err, "reconciliation failed");
        }
        ReconcileResult::failed(err.attribute(kind, name))
    }

    async fn retire(&self, store: &dyn ObjectStore, req: &Request, hook: &dyn Hook, labels: &LabelSet) -> Result<ReconcileResult> {
        let (kind, name) = (hook.kind(), hook.resource_name());
        let key = hook.object_key()?;
        let existing = match req.bounded(store.get(&key)).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => return Ok(ReconcileResult::default()),
            Err(e) => {
                self.unexpected(&e, format!("failed to read the {} {}", name, kind)).await;
                return Err(e);
            }
        };
        if !labels.is_controlled(&existing.metadata) {
            info!(kind, name, "not wanted, but not managed by us; leaving it in place");
            return Ok(ReconcileResult::default());
        }
        match req.bounded(store.delete(&key)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(ReconcileResult::default()),
            Err(e) => {
                self.unexpected(&e, format!("failed to delete the {} {}", name, kind)).await;
                return Err(e);
            }
        }
        info!(kind, name, "deleted; no longer wanted");
        counter!("reconcile_deleted_total", 1u64, "kind" => kind.to_string());
        Ok(ReconcileResult { deleted: true, ..Default::default() })
    }

    async fn converge(&self, store: &dyn ObjectStore, req: &Request, hook: &dyn Hook, first_loop: bool) -> Result<ReconcileResult> {
        let key = hook.object_key()?;
        debug!(key = %key, "reading the current object");
        let existing = match req.bounded(store.get(&key)).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                self.unexpected(&e, format!("failed to read the {} {}", hook.resource_name(), hook.kind())).await;
                return Err(e);
            }
        };

        let mut res = match existing {
            None => self.create(store, req, hook).await?,
            Some(existing) => self.update(store, req, hook, existing, first_loop).await?,
        };
        res.upgraded = req.upgrade_mode;
        Ok(res)
    }

    async fn create(&self, store: &dyn ObjectStore, req: &Request, hook: &dyn Hook) -> Result<ReconcileResult> {
        let (kind, name) = (hook.kind(), hook.resource_name());
        info!(kind, name, "can't find the object; creating a new one");
        let required = match hook.build_full_desired() {
            Ok(obj) => obj,
            Err(e) => {
                self.unexpected(&e, format!("failed to build the {} {}", name, kind)).await;
                return Err(e);
            }
        };
        let created = match req.bounded(store.create(&required)).await {
            Ok(obj) => obj,
            Err(e) => {
                self.unexpected(&e, format!("failed to create the {} {}", name, kind)).await;
                return Err(e);
            }
        };
        info!(kind, name, "successfully created");
        counter!("reconcile_created_total", 1u64, "kind" => kind.to_string());
        let subject = object_reference(&created).ok();
        self.events
            .emit(Signal::new(Severity::Normal, REASON_CREATED, format!("Created {} {}", kind, name)).about(subject))
            .await;
        Ok(ReconcileResult { created: true, object: Some(created), ..Default::default() })
    }

    async fn update(
        &self,
        store: &dyn ObjectStore,
        req: &Request,
        hook: &dyn Hook,
        existing: ManagedObject,
        first_loop: bool,
    ) -> Result<ReconcileResult> {
        let outcome = match hook.update_existing(req, store, existing).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.unexpected(&e, format!("failed to update the {} {}", hook.resource_name(), hook.kind())).await;
                return Err(e);
            }
        };
        if outcome.changed {
            counter!("reconcile_updated_total", 1u64, "kind" => hook.kind().to_string());
            self.handle_updated(req, hook, &outcome.object, first_loop).await;
        }
        Ok(ReconcileResult { updated: outcome.changed, object: Some(outcome.object), ..Default::default() })
    }

    async fn handle_updated(&self, req: &Request, hook: &dyn Hook, object: &ManagedObject, first_loop: bool) {
        let (kind, name) = (hook.kind(), hook.resource_name());
        let subject = object_reference(object).ok();
        match Provenance::of(req) {
            Provenance::Operator => {
                info!(kind, name, "updated to the new desired state");
                self.events
                    .emit(Signal::new(Severity::Normal, REASON_UPDATED, format!("Updated {} {}", kind, name)).about(subject))
                    .await;
            }
            Provenance::External => {
                warn!(kind, name, "overwrote an external modification");
                self.events
                    .emit(Signal::new(Severity::Warning, REASON_OVERWRITTEN, format!("Overwritten {} {}", kind, name)).about(subject))
                    .await;
                if !first_loop && !req.upgrade_mode {
                    self.drift.inc_overwritten(kind, name);
                }
            }
        }
    }

    /// Warning signal for a failed hook. Cancellation is not signaled.
    async fn unexpected(&self, err: &Error, message: String) {
        if err.is_cancelled() {
            return;
        }
        self.events.emit(Signal::new(Severity::Warning, REASON_UNEXPECTED_ERROR, message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn provenance_follows_trigger_flag() {
        let req = Request::new(CancellationToken::new());
        assert_eq!(Provenance::of(&req), Provenance::External);
        let req = req.operator_triggered(true);
        assert_eq!(Provenance::of(&req), Provenance::Operator);
    }
}

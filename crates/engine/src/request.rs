//! Per-pass request context handed from the driver to every hook invocation.

use std::future::Future;
use std::time::Duration;

use keel_core::StoreError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::related::RelatedObjects;

#[derive(Debug)]
pub struct Request {
    pub cancel: CancellationToken,
    /// Hard deadline for the whole pass.
    pub deadline: Option<Instant>,
    /// Upper bound for a single store call; filled from `EngineConfig` when unset.
    pub call_timeout: Option<Duration>,
    /// The triggering event was an operator-intended change (e.g. a spec update of
    /// the top-level resource) rather than a resync or a foreign change.
    pub operator_triggered: bool,
    pub upgrade_mode: bool,
    /// Related-object list of the top-level resource's status.
    pub related_objects: RelatedObjects,
    /// Set when `related_objects` changed and the status needs persisting.
    pub status_dirty: bool,
}

impl Request {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            call_timeout: None,
            operator_triggered: false,
            upgrade_mode: false,
            related_objects: RelatedObjects::default(),
            status_dirty: false,
        }
    }

    pub fn operator_triggered(mut self, yes: bool) -> Self {
        self.operator_triggered = yes;
        self
    }

    pub fn upgrade_mode(mut self, yes: bool) -> Self {
        self.upgrade_mode = yes;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_related_objects(mut self, related: RelatedObjects) -> Self {
        self.related_objects = related;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn call_deadline(&self) -> Option<Instant> {
        let per_call = self.call_timeout.map(|t| Instant::now() + t);
        match (self.deadline, per_call) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run one store call under the request's cancellation token and deadline.
    /// Expiry aborts the call with `Error::Cancelled`; nothing is retried.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let limit = self.call_deadline();
        let guarded = async move {
            match limit {
                Some(at) => match tokio::time::timeout_at(at, call).await {
                    Ok(res) => res.map_err(Error::from),
                    Err(_) => Err(Error::Cancelled),
                },
                None => call.await.map_err(Error::from),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = guarded => res,
        }
    }
}

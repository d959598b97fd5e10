//! Signal emission for create/update/error notifications.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const REASON_CREATED: &str = "Created";
pub const REASON_UPDATED: &str = "Updated";
pub const REASON_OVERWRITTEN: &str = "Overwritten";
pub const REASON_UNEXPECTED_ERROR: &str = "UnexpectedError";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    /// The managed object the signal is about, when known.
    pub subject: Option<ObjectReference>,
}

impl Signal {
    pub fn new(severity: Severity, reason: &str, message: impl Into<String>) -> Self {
        Self { severity, reason: reason.to_string(), message: message.into(), subject: None }
    }

    pub fn about(mut self, subject: Option<ObjectReference>) -> Self {
        self.subject = subject;
        self
    }
}

/// Sink for signals. Emission failures are the sink's business; they never fail a hook.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, signal: Signal);
}

/// Logs signals only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, signal: Signal) {
        let subject = signal.subject.as_ref().and_then(|s| s.name.clone()).unwrap_or_default();
        match signal.severity {
            Severity::Normal => info!(reason = %signal.reason, subject = %subject, "{}", signal.message),
            Severity::Warning => warn!(reason = %signal.reason, subject = %subject, "{}", signal.message),
        }
    }
}

/// Keeps every signal in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingEventSink {
    pub fn new() -> Self { Self::default() }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn reasons(&self) -> Vec<String> { self.signals().into_iter().map(|s| s.reason).collect() }

    pub fn clear(&self) { self.signals.lock().unwrap_or_else(|p| p.into_inner()).clear(); }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, signal: Signal) {
        self.signals.lock().unwrap_or_else(|p| p.into_inner()).push(signal);
    }
}

/// Publishes signals as Kubernetes events regarding the top-level resource; the
/// managed object goes into the `related` slot.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str, regarding: ObjectReference) -> Self {
        let reporter = Reporter { controller: controller.to_string(), instance: std::env::var("POD_NAME").ok() };
        Self { recorder: Recorder::new(client, reporter, regarding) }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn emit(&self, signal: Signal) {
        let ev = Event {
            type_: match signal.severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: signal.reason.clone(),
            note: Some(signal.message.clone()),
            action: "Reconcile".into(),
            secondary: signal.subject.clone(),
        };
        if let Err(e) = self.recorder.publish(ev).await {
            warn!(error = %e, reason = %signal.reason, "failed to publish event");
        }
    }
}

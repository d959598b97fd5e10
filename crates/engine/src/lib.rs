//! Keel engine: converges a set of managed objects to their desired state.
//!
//! A caller plugs resource kinds in through [`Hook`]s, registers them on an
//! [`Orchestrator`] and runs one pass per trigger. Each hook goes through the
//! same procedure: look the object up, create it when absent, otherwise let the
//! hook merge and write it. Updates are classified by provenance: operator-driven
//! changes are informational, anything else is an overwrite of somebody's edit
//! and is counted. Every object touched ends up in the request's related-object
//! list.
//!
//! There is no requeueing or backoff here; the driver owns the control loop.

#![forbid(unsafe_code)]

pub mod config;
pub mod drift;
pub mod error;
pub mod hook;
pub mod orchestrator;
pub mod reconcile;
pub mod related;
pub mod request;
pub mod signal;

pub use config::EngineConfig;
pub use drift::{DriftCounter, MemoryDriftCounter, MetricsDriftCounter};
pub use error::{Error, Result};
pub use hook::{Hook, UpdateOutcome};
pub use orchestrator::{HookReport, Orchestrator, PassReport};
pub use reconcile::{Engine, Provenance, ReconcileResult};
pub use related::{object_reference, RelatedObjects};
pub use request::Request;
pub use signal::{EventSink, KubeEventSink, RecordingEventSink, Severity, Signal, TracingEventSink};

pub use tokio_util::sync::CancellationToken;

//! Counter for modifications made by third parties and overwritten by the engine.

use std::collections::BTreeMap;
use std::sync::Mutex;

use metrics::counter;

pub const OVERWRITTEN_METRIC: &str = "overwritten_modifications_total";

pub trait DriftCounter: Send + Sync {
    fn inc_overwritten(&self, kind: &str, name: &str);
}

/// Exports through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsDriftCounter;

impl DriftCounter for MetricsDriftCounter {
    fn inc_overwritten(&self, kind: &str, name: &str) {
        counter!(OVERWRITTEN_METRIC, 1u64, "kind" => kind.to_string(), "name" => name.to_string());
    }
}

/// In-process tally keyed by `(kind, name)`.
#[derive(Debug, Default)]
pub struct MemoryDriftCounter {
    counts: Mutex<BTreeMap<(String, String), u64>>,
}

impl MemoryDriftCounter {
    pub fn new() -> Self { Self::default() }

    pub fn count(&self, kind: &str, name: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.get(&(kind.to_string(), name.to_string())).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 { self.counts.lock().unwrap_or_else(|p| p.into_inner()).values().sum() }
}

impl DriftCounter for MemoryDriftCounter {
    fn inc_overwritten(&self, kind: &str, name: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        *counts.entry((kind.to_string(), name.to_string())).or_insert(0) += 1;
    }
}

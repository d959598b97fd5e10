//! Engine configuration, passed explicitly to the orchestrator.

use std::collections::BTreeMap;
use std::time::Duration;

use keel_core::LabelSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Abort the remaining hooks of a pass on the first fatal error.
    pub fail_fast: bool,
    /// Bound for a single store call when the request does not set one.
    pub store_timeout: Option<Duration>,
    /// Managed label values stamped on desired objects.
    pub labels: LabelSet,
    /// Create missing target namespaces before a pass.
    pub ensure_namespaces: bool,
    /// Labels every target namespace must carry.
    pub namespace_labels: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            store_timeout: Some(Duration::from_secs(30)),
            labels: LabelSet::default(),
            ensure_namespaces: false,
            namespace_labels: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `KEEL_*` environment variables.
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("KEEL_FAIL_FAST") {
            cfg.fail_fast = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(ms) = get("KEEL_STORE_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            // 0 disables the per-call bound
            cfg.store_timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
        }
        if let Some(v) = get("KEEL_APP_NAME") {
            cfg.labels.app = v;
        }
        if let Some(v) = get("KEEL_MANAGED_BY") {
            cfg.labels.managed_by = v;
        }
        if let Some(v) = get("KEEL_PART_OF") {
            cfg.labels.part_of = v;
        }
        if let Some(v) = get("KEEL_VERSION") {
            cfg.labels.version = v;
        }
        if let Some(v) = get("KEEL_ENSURE_NAMESPACES") {
            cfg.ensure_namespaces = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("KEEL_NAMESPACE_LABELS") {
            cfg.namespace_labels = parse_labels(&v);
        }
        cfg
    }
}

/// `k=v,k2=v2`; malformed pairs are skipped.
fn parse_labels(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

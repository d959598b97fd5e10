//! Related-object list persisted between runs as a JSON file.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use keel_engine::RelatedObjects;

/// Empty list when the file does not exist yet.
pub fn load(path: &Path) -> Result<RelatedObjects> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).with_context(|| format!("parsing status file {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(RelatedObjects::default()),
        Err(e) => Err(e).with_context(|| format!("reading status file {}", path.display())),
    }
}

/// Write through a sibling temp file so a crash never leaves half a file.
pub fn save(path: &Path, related: &RelatedObjects) -> Result<()> {
    let body = serde_json::to_string_pretty(related)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing status file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;

    #[test]
    fn missing_file_is_empty_and_roundtrip_keeps_order() {
        let dir = std::env::temp_dir().join(format!("keelctl-status-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("related.json");
        let _ = fs::remove_file(&path);
        assert!(load(&path).unwrap().is_empty());

        let entry = |kind: &str, name: &str| ObjectReference {
            api_version: Some("v1".into()),
            kind: Some(kind.into()),
            namespace: Some("ns".into()),
            name: Some(name.into()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        };
        let related = RelatedObjects::from(vec![entry("Service", "b"), entry("ConfigMap", "a")]);
        save(&path, &related).unwrap();
        assert_eq!(load(&path).unwrap(), related);
        assert!(!path.with_extension("tmp").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = std::env::temp_dir().join(format!("keelctl-garbage-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("related.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}

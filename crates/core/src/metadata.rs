//! Label and owner-reference comparison and merge.
//!
//! Labels present on the desired object are the managed set: they must be present
//! on the existing object with the desired value. Any other label on the existing
//! object belongs to somebody else and is never touched. Owner references are fully
//! engine-controlled and are replaced wholesale.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::ManagedObject;

/// Every desired label is present on `existing` with the desired value.
pub fn labels_match(desired: &ObjectMeta, existing: &ObjectMeta) -> bool {
    let Some(want) = desired.labels.as_ref() else { return true };
    let have = existing.labels.as_ref();
    want.iter().all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    a.api_version == b.api_version
        && a.kind == b.kind
        && a.name == b.name
        && a.uid == b.uid
        && a.controller == b.controller
        && a.block_owner_deletion == b.block_owner_deletion
}

/// Element-for-element, same order. An absent list equals an empty one.
pub fn owner_references_match(desired: &ObjectMeta, existing: &ObjectMeta) -> bool {
    let want = desired.owner_references.as_deref().unwrap_or(&[]);
    let have = existing.owner_references.as_deref().unwrap_or(&[]);
    want.len() == have.len() && want.iter().zip(have).all(|(a, b)| same_owner(a, b))
}

pub fn metadata_matches(desired: &ObjectMeta, existing: &ObjectMeta) -> bool {
    owner_references_match(desired, existing) && labels_match(desired, existing)
}

/// Write the desired labels into `existing`, keeping unmanaged keys.
pub fn merge_labels(desired: &ObjectMeta, existing: &mut ObjectMeta) {
    let Some(want) = desired.labels.as_ref() else { return };
    if want.is_empty() {
        return;
    }
    let have = existing.labels.get_or_insert_with(Default::default);
    for (k, v) in want {
        have.insert(k.clone(), v.clone());
    }
}

/// Bring labels and owner references of `existing` in line with `desired`.
/// Returns true if anything was changed.
pub fn update_common_details(desired: &ObjectMeta, existing: &mut ObjectMeta) -> bool {
    if metadata_matches(desired, existing) {
        return false;
    }
    merge_labels(desired, existing);
    existing.owner_references = match desired.owner_references.as_ref() {
        Some(refs) if !refs.is_empty() => Some(refs.clone()),
        _ => None,
    };
    true
}

/// Owner reference pointing at a store object. `None` if the object lacks type
/// information, a name or a UID.
pub fn owner_reference_for(owner: &ManagedObject, controller: bool) -> Option<OwnerReference> {
    let types = owner.types.as_ref()?;
    Some(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: owner.metadata.name.clone()?,
        uid: owner.metadata.uid.clone()?,
        block_owner_deletion: Some(false),
        controller: Some(controller),
    })
}

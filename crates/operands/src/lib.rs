//! Keel operands: hook implementations for the engine.
//!
//! Most kinds are reconciled uniformly by [`UniformHook`]. Kinds whose store
//! representation picks up server-side values or carries keyed child lists get a
//! dedicated hook: [`ServiceHook`] and [`ImageStreamHook`].

#![forbid(unsafe_code)]

use keel_core::{LabelSet, ManagedObject};
use keel_engine::{Error, Hook, Result};

pub mod builder;
pub mod image_stream;
pub mod service;
pub mod uniform;

pub use builder::{stamp_labels, DesiredObject};
pub use image_stream::{ImageStreamHook, TagImportPolicy, TagReference, TagSource};
pub use service::ServiceHook;
pub use uniform::UniformHook;

/// Pick the hook for a desired object by its kind. Managed labels are stamped
/// onto the object first.
pub fn hook_for(mut desired: ManagedObject, labels: &LabelSet) -> Result<Box<dyn Hook>> {
    stamp_labels(&mut desired, labels);
    let types = desired.types.clone().ok_or_else(|| Error::hook_logic("desired object needs apiVersion and kind"))?;
    let hook: Box<dyn Hook> = match (types.api_version.as_str(), types.kind.as_str()) {
        ("v1", "Service") => Box::new(ServiceHook::from_object(&desired)?),
        (image_stream::API_VERSION, image_stream::KIND) => Box::new(ImageStreamHook::from_object(labels.clone(), &desired)?),
        _ => Box::new(UniformHook::from_manifest(desired)?),
    };
    Ok(hook)
}

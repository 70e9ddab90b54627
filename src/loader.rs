//! Bundle content loading and ownership labeling
//!
//! Loads the objects of the Bundle a BundleInstance references and stamps
//! each one with labels naming the owning instance, so that events on the
//! installed objects can be traced back to it.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::Bundle;
use crate::storage::BundleStorage;
use crate::{Error, OWNER_KIND, OWNER_KIND_LABEL, OWNER_NAME_LABEL};

/// Owner labels for objects produced on behalf of the named instance
pub fn owner_labels(instance_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_KIND_LABEL.to_string(), OWNER_KIND.to_string()),
        (OWNER_NAME_LABEL.to_string(), instance_name.to_string()),
    ])
}

/// Merge owner labels into every object, keeping existing labels.
///
/// Owner labels win over pre-existing values for the same keys.
pub fn apply_owner_labels(objects: &mut [DynamicObject], instance_name: &str) {
    let owner = owner_labels(instance_name);
    for object in objects.iter_mut() {
        let labels = object.labels_mut();
        for (key, value) in &owner {
            labels.insert(key.clone(), value.clone());
        }
    }
}

/// Load the Bundle's objects and label them for the named instance.
///
/// Fails with [`Error::BundleNotUnpacked`] while the Bundle is not in the
/// Unpacked phase; any other storage failure is [`Error::Storage`].
pub async fn load_bundle(
    storage: &dyn BundleStorage,
    bundle: &Bundle,
    instance_name: &str,
) -> Result<Vec<DynamicObject>, Error> {
    if !bundle.is_unpacked() {
        return Err(Error::BundleNotUnpacked(bundle.phase()));
    }

    let mut objects = storage.load(bundle).await?;
    apply_owner_labels(&mut objects, instance_name);

    debug!(
        bundle = %bundle.name_any(),
        count = objects.len(),
        "loaded bundle objects"
    );
    Ok(objects)
}

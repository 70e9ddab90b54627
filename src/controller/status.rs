//! Status reporting for BundleInstance passes

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::{debug, error};

use super::KubeClient;
use crate::crd::{BundleInstance, BundleInstanceStatus};
use crate::{Error, FIELD_MANAGER};

/// Body of a server-side apply status patch.
///
/// Only fields owned by this controller are sent, so fields written by
/// other managers are left alone.
pub fn status_apply_body(status: &BundleInstanceStatus) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": crate::API_VERSION,
        "kind": crate::OWNER_KIND,
        "status": status,
    })
}

/// Apply a BundleInstance status with the controller's field manager
pub async fn apply_status(
    client: &Client,
    name: &str,
    status: &BundleInstanceStatus,
) -> Result<(), Error> {
    let api: Api<BundleInstance> = Api::all(client.clone());
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&status_apply_body(status)),
    )
    .await?;
    Ok(())
}

/// Write the pass's status back, logging instead of failing.
///
/// A lost write is repaired by the next pass, which recomputes the same
/// conditions.
pub async fn report_status(kube: &dyn KubeClient, name: &str, status: &BundleInstanceStatus) {
    match kube.patch_status(name, status).await {
        Ok(()) => debug!(conditions = status.conditions.len(), "status reported"),
        Err(e) => error!(error = %e, "failed to report status"),
    }
}

//! Controller for Plank CRDs
//!
//! Reconciles BundleInstances into releases. Triggers come from the
//! BundleInstance watch, the Bundle watch and the dynamic watches registered
//! for every kind a release installs.

mod bundle_instance;
mod runner;
mod status;

pub use bundle_instance::{
    error_policy, instances_for_bundle, reconcile, Context, ContextBuilder, KubeClient,
    KubeClientImpl, DEFAULT_RELEASE_NAMESPACE, DEFAULT_STORAGE_NAMESPACE,
};
pub use runner::{run, ControllerConfig, DEFAULT_WATCH_CHANNEL_CAPACITY};
pub use status::{apply_status, report_status, status_apply_body};

#[cfg(test)]
pub use bundle_instance::MockKubeClient;

//! Controller wiring
//!
//! Builds the BundleInstance controller with its three trigger sources and
//! drives it until shutdown.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use super::bundle_instance::{
    error_policy, instances_for_bundle, reconcile, Context, DEFAULT_RELEASE_NAMESPACE,
    DEFAULT_STORAGE_NAMESPACE,
};
use crate::crd::{Bundle, BundleInstance};

/// Default buffer size of the dynamic watch trigger channel
pub const DEFAULT_WATCH_CHANNEL_CAPACITY: usize = 256;

/// Runtime settings for the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace releases are recorded and installed in
    pub release_namespace: String,
    /// Namespace holding unpacked Bundle content
    pub storage_namespace: String,
    /// Buffer size of the dynamic watch trigger channel
    pub watch_channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            release_namespace: DEFAULT_RELEASE_NAMESPACE.to_string(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            watch_channel_capacity: DEFAULT_WATCH_CHANNEL_CAPACITY,
        }
    }
}

/// Run the BundleInstance controller until a shutdown signal arrives.
///
/// Triggers: BundleInstance changes, changes of the Bundles they reference,
/// and events from the dynamic watches forwarded over a bounded channel.
pub async fn run(client: Client, config: ControllerConfig) {
    let (triggers, trigger_rx) = mpsc::channel(config.watch_channel_capacity.max(1));
    let ctx = Arc::new(
        Context::builder(client.clone())
            .release_namespace(config.release_namespace)
            .storage_namespace(config.storage_namespace)
            .build(triggers),
    );

    let instances: Api<BundleInstance> = Api::all(client.clone());
    let bundles: Api<Bundle> = Api::all(client);

    let controller = Controller::new(instances, WatcherConfig::default());
    let store = controller.store();

    info!("starting BundleInstance controller");
    controller
        .watches(bundles, WatcherConfig::default(), move |bundle| {
            instances_for_bundle(&store, &bundle)
        })
        .reconcile_on(ReceiverStream::new(trigger_rx))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => debug!(?action, "BundleInstance reconciliation completed"),
                Err(e) => error!(error = ?e, "BundleInstance reconciliation error"),
            }
        })
        .await;
    info!("BundleInstance controller stopped");
}

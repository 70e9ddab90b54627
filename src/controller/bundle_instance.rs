//! BundleInstance controller implementation
//!
//! Each pass loads the referenced Bundle's content, materializes it into a
//! chart, converges the release for the instance and makes sure every kind
//! the release contains is watched. The outcome of the pass is always
//! written back as conditions on the instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::status::{apply_status, report_status};
use crate::chart::materialize;
use crate::crd::types::{
    unpack_wait_reason, Condition, ConditionStatus, REASON_BUNDLE_LOAD_FAILED,
    REASON_BUNDLE_LOOKUP_FAILED, REASON_CREATE_DYNAMIC_WATCH_FAILED, REASON_ERROR_GETTING_CLIENT,
    REASON_ERROR_GETTING_RELEASE_STATE, REASON_INSTALLATION_SUCCEEDED,
    REASON_READING_CONTENT_FAILED, TYPE_HAS_VALID_BUNDLE, TYPE_INSTALLED,
    TYPE_INVALID_BUNDLE_CONTENT,
};
use crate::crd::{Bundle, BundleInstance, BundleInstanceStatus};
use crate::discovery::{gvk_of, KindResolver};
use crate::loader::load_bundle;
use crate::release::{
    apply_release_state, evaluate_release_state, KubeReleaseClientGetter, ReleaseClientGetter,
};
use crate::storage::{BundleStorage, ConfigMapStorage};
use crate::watch::{DynamicWatchSubscriber, WatchRegistry};
use crate::{Error, PROVISIONER_ID};

/// Default namespace for release records and unnamespaced objects
pub const DEFAULT_RELEASE_NAMESPACE: &str = "plank-system";
/// Default namespace holding unpacked Bundle content
pub const DEFAULT_STORAGE_NAMESPACE: &str = "plank-system";

/// Trait abstracting Kubernetes client operations for BundleInstances
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Bundle by name
    async fn get_bundle(&self, name: &str) -> Result<Bundle, Error>;

    /// Apply the controller-owned status fields of a BundleInstance
    async fn patch_status(&self, name: &str, status: &BundleInstanceStatus) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_bundle(&self, name: &str) -> Result<Bundle, Error> {
        let api: Api<Bundle> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn patch_status(&self, name: &str, status: &BundleInstanceStatus) -> Result<(), Error> {
        apply_status(&self.client, name, status).await
    }
}

/// Controller context shared by all passes
pub struct Context {
    /// Kubernetes client for Bundle lookups and status writes
    pub kube: Arc<dyn KubeClient>,
    /// Storage holding unpacked Bundle content
    pub storage: Arc<dyn BundleStorage>,
    /// Builds release clients per instance
    pub releases: Arc<dyn ReleaseClientGetter>,
    /// Kinds already being watched
    pub watches: Arc<WatchRegistry>,
    /// Namespace releases are installed into
    pub release_namespace: String,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        storage: Arc<dyn BundleStorage>,
        releases: Arc<dyn ReleaseClientGetter>,
        watches: Arc<WatchRegistry>,
        release_namespace: &str,
    ) -> Self {
        Self {
            kube,
            storage,
            releases,
            watches,
            release_namespace: release_namespace.to_string(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let (tx, rx) = tokio::sync::mpsc::channel(256);
/// let ctx = Context::builder(client)
///     .release_namespace("plank-system")
///     .storage_namespace("plank-system")
///     .build(tx);
/// ```
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    storage: Option<Arc<dyn BundleStorage>>,
    releases: Option<Arc<dyn ReleaseClientGetter>>,
    release_namespace: String,
    storage_namespace: String,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            storage: None,
            releases: None,
            release_namespace: DEFAULT_RELEASE_NAMESPACE.to_string(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
        }
    }

    /// Set the release namespace
    pub fn release_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.release_namespace = namespace.into();
        self
    }

    /// Set the Bundle storage namespace
    pub fn storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the Bundle storage
    pub fn storage(mut self, storage: Arc<dyn BundleStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the release client getter
    pub fn release_client_getter(mut self, releases: Arc<dyn ReleaseClientGetter>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Build the Context; dynamic watch triggers are sent to `triggers`
    pub fn build(self, triggers: mpsc::Sender<ObjectRef<BundleInstance>>) -> Context {
        let resolver = Arc::new(KindResolver::new(self.client.clone()));
        let subscriber =
            DynamicWatchSubscriber::new(self.client.clone(), resolver.clone(), triggers);

        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            storage: self.storage.unwrap_or_else(|| {
                Arc::new(ConfigMapStorage::new(
                    self.client.clone(),
                    self.storage_namespace.clone(),
                ))
            }),
            releases: self.releases.unwrap_or_else(|| {
                Arc::new(KubeReleaseClientGetter::new(
                    self.client.clone(),
                    resolver.clone(),
                    self.release_namespace.clone(),
                ))
            }),
            watches: Arc::new(WatchRegistry::new(Arc::new(subscriber))),
            release_namespace: self.release_namespace,
        }
    }
}

/// Reconcile a BundleInstance
///
/// The pass result decides requeueing; the status write at the end is
/// best-effort and never changes it.
#[instrument(skip(instance, ctx), fields(instance = %instance.name_any()))]
pub async fn reconcile(instance: Arc<BundleInstance>, ctx: Arc<Context>) -> Result<Action, Error> {
    if !instance.is_provisioned_by(PROVISIONER_ID) {
        debug!(
            provisioner = %instance.spec.provisioner_class_name,
            "instance belongs to another provisioner, skipping"
        );
        return Ok(Action::await_change());
    }

    let name = instance.name_any();
    debug!("starting reconciliation");

    let mut status = instance.status.clone().unwrap_or_default();
    let result = reconcile_pass(&instance, &ctx, &mut status).await;
    report_status(ctx.kube.as_ref(), &name, &status).await;

    debug!(ok = result.is_ok(), "finished reconciliation");
    result.map(|()| Action::await_change())
}

fn installed_false(reason: &str, message: impl Into<String>) -> Condition {
    Condition::new(TYPE_INSTALLED, ConditionStatus::False, reason, message)
}

/// One pass over an instance; conditions are accumulated in `status`
async fn reconcile_pass(
    instance: &BundleInstance,
    ctx: &Context,
    status: &mut BundleInstanceStatus,
) -> Result<(), Error> {
    let name = instance.name_any();
    let bundle_name = &instance.spec.bundle_name;

    let bundle = match ctx.kube.get_bundle(bundle_name).await {
        Ok(bundle) => bundle,
        Err(e) if e.is_not_found() => {
            info!(bundle = %bundle_name, "referenced bundle not found, waiting for it");
            status.set_condition(Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::False,
                REASON_BUNDLE_LOOKUP_FAILED,
                e.to_string(),
            ));
            return Ok(());
        }
        Err(e) => {
            status.set_condition(Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::Unknown,
                REASON_BUNDLE_LOOKUP_FAILED,
                e.to_string(),
            ));
            return Err(e);
        }
    };

    let objects = match load_bundle(ctx.storage.as_ref(), &bundle, &name).await {
        Ok(objects) => objects,
        Err(Error::BundleNotUnpacked(phase)) => {
            info!(bundle = %bundle_name, phase = ?phase, "bundle not unpacked yet, waiting");
            let message = Error::BundleNotUnpacked(phase).to_string();
            status.set_condition(installed_false(&unpack_wait_reason(phase), message));
            return Ok(());
        }
        Err(e) => {
            status.set_condition(Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::False,
                REASON_BUNDLE_LOAD_FAILED,
                e.to_string(),
            ));
            return Err(e);
        }
    };

    let chart = match materialize(&objects) {
        Ok(chart) => chart,
        Err(e) => {
            status.set_condition(Condition::new(
                TYPE_INVALID_BUNDLE_CONTENT,
                ConditionStatus::True,
                REASON_READING_CONTENT_FAILED,
                e.to_string(),
            ));
            return Err(e);
        }
    };

    let client = match ctx.releases.client_for(instance) {
        Ok(client) => client,
        Err(e) => {
            status.set_condition(installed_false(REASON_ERROR_GETTING_CLIENT, e.to_string()));
            return Err(e.into());
        }
    };

    let namespace = ctx.release_namespace.as_str();
    let state = match evaluate_release_state(client.as_ref(), &name, namespace, &chart).await {
        Ok(state) => state,
        Err(e) => {
            status.set_condition(installed_false(
                REASON_ERROR_GETTING_RELEASE_STATE,
                e.to_string(),
            ));
            return Err(e.into());
        }
    };

    if let Err(e) = apply_release_state(client.as_ref(), &state, &name, namespace, &chart).await {
        warn!(state = state.as_str(), error = %e, "release apply failed");
        status.set_condition(installed_false(state.failure_reason(), e.to_string()));
        return Err(e.into());
    }

    if let Err(e) = ensure_kinds_watched(&ctx.watches, &objects).await {
        status.set_condition(installed_false(
            REASON_CREATE_DYNAMIC_WATCH_FAILED,
            e.to_string(),
        ));
        return Err(e);
    }

    status.set_condition(Condition::new(
        TYPE_INSTALLED,
        ConditionStatus::True,
        REASON_INSTALLATION_SUCCEEDED,
        "",
    ));
    status.installed_bundle_name = Some(bundle_name.clone());
    info!(bundle = %bundle_name, state = state.as_str(), "bundle installed");
    Ok(())
}

/// Register a watch for every kind among the installed objects
async fn ensure_kinds_watched(
    watches: &WatchRegistry,
    objects: &[DynamicObject],
) -> Result<(), Error> {
    for object in objects {
        let gvk = gvk_of(object)?;
        watches.ensure_watched(&gvk).await?;
    }
    Ok(())
}

/// Instances referencing a Bundle, used to map Bundle events to triggers
pub fn instances_for_bundle(
    store: &Store<BundleInstance>,
    bundle: &Bundle,
) -> Vec<ObjectRef<BundleInstance>> {
    let bundle_name = bundle.name_any();
    store
        .state()
        .iter()
        .filter(|instance| instance.spec.bundle_name == bundle_name)
        .map(|instance| ObjectRef::from_obj(instance.as_ref()))
        .collect()
}

/// Error policy for the controller
///
/// Logs the failure and requeues after a fixed delay.
pub fn error_policy(instance: Arc<BundleInstance>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        instance = %instance.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

//! Kubernetes-backed release client
//!
//! Release revisions are stored as Secrets in the release namespace, one per
//! revision. Chart objects are applied with server-side apply and carry a
//! controller owner reference to the BundleInstance they were installed for.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::{
    render_manifest, InstallOptions, Release, ReleaseClient, ReleaseClientGetter, ReleaseError,
    ReleaseStatus, UpgradeOptions,
};
use crate::chart::Chart;
use crate::crd::BundleInstance;
use crate::discovery::{gvk_of, kind_priority, KindResolver};
use crate::storage::parse_manifests;
use crate::FIELD_MANAGER;

/// Label identifying release record Secrets
const OWNER_LABEL: &str = "owner";
/// Value of [`OWNER_LABEL`] on records written here
const OWNER_VALUE: &str = "plank";
/// Data key holding the JSON release record
const RELEASE_KEY: &str = "release";
/// Secret type of release records
const RECORD_TYPE: &str = "plank.dev/release.v1";

/// Name of the Secret holding one release revision
pub fn record_name(release: &str, version: u32) -> String {
    format!("plank.release.v1.{release}.v{version}")
}

fn record_selector(release: &str) -> String {
    format!("{OWNER_LABEL}={OWNER_VALUE},name={release}")
}

/// Serialize a release into its record Secret
fn to_record(release: &Release) -> Result<Secret, ReleaseError> {
    let json = serde_json::to_vec(release)
        .map_err(|e| ReleaseError::backend(format!("encode release record: {e}")))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(record_name(&release.name, release.version)),
            namespace: Some(release.namespace.clone()),
            labels: Some(BTreeMap::from([
                (OWNER_LABEL.to_string(), OWNER_VALUE.to_string()),
                ("name".to_string(), release.name.clone()),
                ("version".to_string(), release.version.to_string()),
                ("status".to_string(), release.status.to_string()),
            ])),
            ..Default::default()
        },
        type_: Some(RECORD_TYPE.to_string()),
        data: Some(BTreeMap::from([(RELEASE_KEY.to_string(), ByteString(json))])),
        ..Default::default()
    })
}

/// Decode a release from its record Secret
fn from_record(secret: &Secret) -> Result<Release, ReleaseError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(RELEASE_KEY))
        .ok_or_else(|| {
            ReleaseError::backend(format!(
                "release record {} has no {RELEASE_KEY} key",
                secret.name_any()
            ))
        })?;
    serde_json::from_slice(&bytes.0).map_err(|e| {
        ReleaseError::backend(format!("decode release record {}: {e}", secret.name_any()))
    })
}

/// Latest revision among decoded records
fn latest(records: impl IntoIterator<Item = Release>) -> Option<Release> {
    records.into_iter().max_by_key(|r| r.version)
}

/// Result of the apply step of an install or upgrade
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApplyOutcome {
    /// Nothing was applied
    DryRun,
    /// Every object applied
    Applied,
    /// At least one object failed to apply
    Failed,
}

impl ApplyOutcome {
    fn of<E>(applied: Option<&Result<(), E>>) -> Self {
        match applied {
            None => Self::DryRun,
            Some(Ok(())) => Self::Applied,
            Some(Err(_)) => Self::Failed,
        }
    }
}

/// Revision bookkeeping for one install or upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
struct RevisionPlan {
    /// Revision being written, in its pending status
    next: Release,
    /// Revision whose objects are live: the last deployed one, else the latest
    baseline: Option<Release>,
}

impl RevisionPlan {
    /// Objects of the baseline that the next revision no longer contains
    fn removed_from(&self, next: &[DynamicObject]) -> Result<Vec<DynamicObject>, ReleaseError> {
        match &self.baseline {
            Some(baseline) => Ok(removed_objects(&manifest_objects(&baseline.manifest)?, next)),
            None => Ok(Vec::new()),
        }
    }

    /// Records to write after the apply step, in write order
    fn records(&self, outcome: ApplyOutcome) -> Vec<Release> {
        match outcome {
            ApplyOutcome::DryRun => Vec::new(),
            ApplyOutcome::Failed => vec![Release {
                status: ReleaseStatus::Failed,
                ..self.next.clone()
            }],
            ApplyOutcome::Applied => {
                let superseded = self
                    .baseline
                    .iter()
                    .filter(|b| b.status == ReleaseStatus::Deployed)
                    .map(|b| Release {
                        status: ReleaseStatus::Superseded,
                        ..b.clone()
                    });
                superseded
                    .chain(std::iter::once(Release {
                        status: ReleaseStatus::Deployed,
                        ..self.next.clone()
                    }))
                    .collect()
            }
        }
    }
}

/// Plan revision 1; refuses when any revision already exists
fn plan_install(
    history: &[Release],
    name: &str,
    namespace: &str,
    manifest: String,
) -> Result<RevisionPlan, ReleaseError> {
    if !history.is_empty() {
        return Err(ReleaseError::AlreadyExists(name.to_string()));
    }
    Ok(RevisionPlan {
        next: Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version: 1,
            status: ReleaseStatus::PendingInstall,
            manifest,
        },
        baseline: None,
    })
}

/// Plan the revision after the latest one.
///
/// A failed latest revision never applied fully, so the baseline is the last
/// deployed revision when there is one.
fn plan_upgrade(
    history: Vec<Release>,
    name: &str,
    namespace: &str,
    manifest: String,
) -> Result<RevisionPlan, ReleaseError> {
    let version = history
        .iter()
        .map(|r| r.version)
        .max()
        .ok_or_else(|| ReleaseError::NotFound(name.to_string()))?;
    let deployed = history
        .iter()
        .filter(|r| r.status == ReleaseStatus::Deployed)
        .max_by_key(|r| r.version)
        .cloned();
    let baseline = deployed.or_else(|| latest(history));

    Ok(RevisionPlan {
        next: Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version: version + 1,
            status: ReleaseStatus::PendingUpgrade,
            manifest,
        },
        baseline,
    })
}

/// Add `owner` as the controller reference, keeping other owners.
///
/// Foreign references lose their controller flag; an object has one controller.
fn merge_owner_reference(
    existing: Option<Vec<OwnerReference>>,
    owner: &OwnerReference,
) -> Vec<OwnerReference> {
    let mut refs: Vec<OwnerReference> = existing
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.uid != owner.uid)
        .map(|mut r| {
            if r.controller == Some(true) {
                r.controller = Some(false);
            }
            r
        })
        .collect();
    refs.push(owner.clone());
    refs
}

/// Identity of an applied object, used to find objects to prune
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectKey {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    fn of(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        Some(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }
}

fn kind_of(object: &DynamicObject) -> &str {
    object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("")
}

/// Objects present in `previous` but not in `next`, in reverse apply order
fn removed_objects(previous: &[DynamicObject], next: &[DynamicObject]) -> Vec<DynamicObject> {
    let keep: HashSet<ObjectKey> = next.iter().filter_map(ObjectKey::of).collect();
    let mut removed: Vec<DynamicObject> = previous
        .iter()
        .filter(|o| ObjectKey::of(o).is_some_and(|k| !keep.contains(&k)))
        .cloned()
        .collect();
    removed.sort_by_key(|o| std::cmp::Reverse(kind_priority(kind_of(o))));
    removed
}

/// Parse every template of a chart back into objects
fn chart_objects(chart: &Chart) -> Result<Vec<DynamicObject>, ReleaseError> {
    chart
        .templates
        .iter()
        .map(|t| {
            serde_yaml::from_str(&t.data)
                .map_err(|e| ReleaseError::backend(format!("parse template {}: {e}", t.name)))
        })
        .collect()
}

fn manifest_objects(manifest: &str) -> Result<Vec<DynamicObject>, ReleaseError> {
    parse_manifests(manifest).map_err(|e| ReleaseError::backend(format!("parse manifest: {e}")))
}

/// Release client acting on behalf of one BundleInstance
pub struct KubeReleaseClient {
    client: Client,
    resolver: Arc<KindResolver>,
    namespace: String,
    owner: OwnerReference,
}

impl KubeReleaseClient {
    /// Create a client whose applied objects are owned by `owner`
    pub fn new(
        client: Client,
        resolver: Arc<KindResolver>,
        namespace: impl Into<String>,
        owner: OwnerReference,
    ) -> Self {
        Self {
            client,
            resolver,
            namespace: namespace.into(),
            owner,
        }
    }

    fn records(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_releases(&self, name: &str) -> Result<Vec<Release>, ReleaseError> {
        let secrets = self
            .records(&self.namespace)
            .list(&ListParams::default().labels(&record_selector(name)))
            .await
            .map_err(|e| ReleaseError::backend(format!("list release records: {e}")))?;
        secrets.items.iter().map(from_record).collect()
    }

    async fn write_record(&self, release: &Release) -> Result<(), ReleaseError> {
        let secret = to_record(release)?;
        let name = record_name(&release.name, release.version);
        self.records(&release.namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| ReleaseError::backend(format!("write release record {name}: {e}")))?;
        debug!(
            release = %release.name,
            version = release.version,
            status = %release.status,
            "recorded release revision"
        );
        Ok(())
    }

    async fn write_records(
        &self,
        plan: &RevisionPlan,
        outcome: ApplyOutcome,
    ) -> Result<(), ReleaseError> {
        for record in plan.records(outcome) {
            self.write_record(&record).await?;
        }
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ReleaseError> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Api::<Namespace>::all(self.client.clone())
            .patch(
                namespace,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&ns),
            )
            .await
            .map_err(|e| ReleaseError::backend(format!("create namespace {namespace}: {e}")))?;
        Ok(())
    }

    /// Dynamic API for an object, defaulting namespaced objects to `namespace`
    async fn api_for(
        &self,
        object: &DynamicObject,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, ReleaseError> {
        let gvk = gvk_of(object).map_err(|e| ReleaseError::backend(e.to_string()))?;
        let kind = self
            .resolver
            .resolve(&gvk)
            .await
            .map_err(|e| ReleaseError::backend(format!("resolve {}: {e}", gvk.kind)))?;

        Ok(if kind.namespaced {
            let ns = object.metadata.namespace.as_deref().unwrap_or(namespace);
            Api::namespaced_with(self.client.clone(), ns, &kind.api_resource)
        } else {
            Api::all_with(self.client.clone(), &kind.api_resource)
        })
    }

    async fn apply_object(
        &self,
        object: &DynamicObject,
        namespace: &str,
    ) -> Result<(), ReleaseError> {
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| ReleaseError::backend("object has no metadata.name"))?;
        let api = self.api_for(object, namespace).await?;

        let mut owned = object.clone();
        owned.metadata.owner_references = Some(merge_owner_reference(
            owned.metadata.owner_references.take(),
            &self.owner,
        ));

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&owned),
        )
        .await
        .map_err(|e| ReleaseError::backend(format!("apply {name}: {e}")))?;
        Ok(())
    }

    /// Apply all objects in kind-priority order.
    ///
    /// Every object is attempted; the first failure is returned afterwards.
    async fn apply_objects(
        &self,
        mut objects: Vec<DynamicObject>,
        namespace: &str,
    ) -> Result<(), ReleaseError> {
        objects.sort_by_key(|o| kind_priority(kind_of(o)));

        let mut first_error = None;
        let mut failed = 0usize;
        for object in &objects {
            if let Err(e) = self.apply_object(object, namespace).await {
                failed += 1;
                warn!(error = %e, object = %object.name_any(), "object apply failed, continuing");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!(failed, total = objects.len(), "release apply incomplete");
                Err(e)
            }
            None => Ok(()),
        }
    }

    async fn prune(&self, removed: &[DynamicObject], namespace: &str) {
        for object in removed {
            let name = object.name_any();
            let result = match self.api_for(object, namespace).await {
                Ok(api) => api
                    .delete(&name, &DeleteParams::default())
                    .await
                    .map(|_| ())
                    .or_else(|e| match e {
                        kube::Error::Api(ae) if ae.code == 404 => Ok(()),
                        other => Err(ReleaseError::backend(other.to_string())),
                    }),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(object = %name, "pruned object removed from release"),
                Err(e) => warn!(object = %name, error = %e, "failed to prune object"),
            }
        }
    }
}

#[async_trait]
impl ReleaseClient for KubeReleaseClient {
    async fn get(&self, name: &str) -> Result<Release, ReleaseError> {
        latest(self.list_releases(name).await?)
            .ok_or_else(|| ReleaseError::NotFound(name.to_string()))
    }

    async fn install(
        &self,
        name: &str,
        namespace: &str,
        chart: &Chart,
        options: InstallOptions,
    ) -> Result<Release, ReleaseError> {
        let history = self.list_releases(name).await?;
        let plan = plan_install(&history, name, namespace, render_manifest(chart))?;
        let objects = chart_objects(chart)?;

        if options.create_namespace {
            self.ensure_namespace(namespace).await?;
        }

        let applied = self.apply_objects(objects, namespace).await;
        self.write_records(&plan, ApplyOutcome::of(Some(&applied)))
            .await?;
        applied?;

        info!(release = %name, objects = chart.len(), "release installed");
        Ok(Release {
            status: ReleaseStatus::Deployed,
            ..plan.next
        })
    }

    async fn upgrade(
        &self,
        name: &str,
        namespace: &str,
        chart: &Chart,
        options: UpgradeOptions,
    ) -> Result<Release, ReleaseError> {
        let history = self.list_releases(name).await?;
        let plan = plan_upgrade(history, name, namespace, render_manifest(chart))?;

        let applied = if options.dry_run {
            None
        } else {
            let objects = chart_objects(chart)?;
            let removed = plan.removed_from(&objects)?;
            let result = self.apply_objects(objects, namespace).await;
            if result.is_ok() {
                self.prune(&removed, namespace).await;
            }
            Some((result, removed.len()))
        };

        self.write_records(&plan, ApplyOutcome::of(applied.as_ref().map(|(r, _)| r)))
            .await?;

        match applied {
            None => Ok(plan.next),
            Some((Err(e), _)) => Err(e),
            Some((Ok(()), pruned)) => {
                info!(
                    release = %name,
                    version = plan.next.version,
                    pruned,
                    "release upgraded"
                );
                Ok(Release {
                    status: ReleaseStatus::Deployed,
                    ..plan.next
                })
            }
        }
    }

    async fn reconcile(&self, release: &Release) -> Result<(), ReleaseError> {
        let objects = manifest_objects(&release.manifest)?;
        self.apply_objects(objects, &release.namespace).await
    }
}

/// Builds [`KubeReleaseClient`]s owned by the given BundleInstance
pub struct KubeReleaseClientGetter {
    client: Client,
    resolver: Arc<KindResolver>,
    namespace: String,
}

impl KubeReleaseClientGetter {
    /// Create a getter storing release records in `namespace`
    pub fn new(client: Client, resolver: Arc<KindResolver>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            resolver,
            namespace: namespace.into(),
        }
    }
}

impl ReleaseClientGetter for KubeReleaseClientGetter {
    fn client_for(
        &self,
        instance: &BundleInstance,
    ) -> Result<Arc<dyn ReleaseClient>, ReleaseError> {
        let owner = instance.controller_owner_ref(&()).ok_or_else(|| {
            ReleaseError::Client(format!(
                "BundleInstance {} has no name or uid",
                instance.name_any()
            ))
        })?;
        Ok(Arc::new(KubeReleaseClient::new(
            self.client.clone(),
            self.resolver.clone(),
            self.namespace.clone(),
            owner,
        )))
    }
}

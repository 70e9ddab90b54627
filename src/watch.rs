//! Dynamic watch registry
//!
//! Every kind a release installs gets one watcher for the life of the
//! process. Events on watched objects are attributed to the owning
//! BundleInstance through its controller owner reference and forwarded into
//! the controller's trigger stream. Status-only updates are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, GroupVersionKind};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{metadata_watcher, watcher, WatchStreamExt};
use kube::Client;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::BundleInstance;
use crate::discovery::KindResolver;
use crate::{Error, API_GROUP, OWNER_KIND};

/// Establishes the watch for one kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KindSubscriber: Send + Sync {
    /// Start watching `gvk`; returns once the watch is set up
    async fn subscribe(&self, gvk: &GroupVersionKind) -> Result<(), Error>;
}

/// Process-wide set of watched kinds
pub struct WatchRegistry {
    watched: RwLock<HashSet<GroupVersionKind>>,
    subscriber: Arc<dyn KindSubscriber>,
}

impl WatchRegistry {
    /// Create an empty registry
    pub fn new(subscriber: Arc<dyn KindSubscriber>) -> Self {
        Self {
            watched: RwLock::new(HashSet::new()),
            subscriber,
        }
    }

    /// Make sure `gvk` is watched, subscribing at most once per process.
    ///
    /// The exclusive lock is held across the membership check, the
    /// subscription and the insert. Returns true if this call subscribed.
    pub async fn ensure_watched(&self, gvk: &GroupVersionKind) -> Result<bool, Error> {
        let mut watched = self.watched.write().await;
        if watched.contains(gvk) {
            return Ok(false);
        }

        self.subscriber.subscribe(gvk).await?;
        watched.insert(gvk.clone());
        info!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            "watching new kind"
        );
        Ok(true)
    }

    /// Returns true if `gvk` is already watched
    pub async fn is_watched(&self, gvk: &GroupVersionKind) -> bool {
        self.watched.read().await.contains(gvk)
    }

    /// Number of watched kinds
    pub async fn len(&self) -> usize {
        self.watched.read().await.len()
    }

    /// Returns true if nothing is watched yet
    pub async fn is_empty(&self) -> bool {
        self.watched.read().await.is_empty()
    }
}

/// BundleInstance named by the object's controller owner reference, if any
pub fn owner_of(meta: &ObjectMeta) -> Option<ObjectRef<BundleInstance>> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| {
            o.controller == Some(true)
                && o.kind == OWNER_KIND
                && o.api_version.split('/').next() == Some(API_GROUP)
        })
        .map(|o| ObjectRef::new(&o.name))
}

/// Generation-based filter for owned object events.
///
/// An update is forwarded only when the object's `metadata.generation`
/// moved, so status-only writes do not trigger a pass. Objects without a
/// generation have no status subresource and always pass. Deletes always
/// pass.
#[derive(Debug, Default)]
pub struct GenerationFilter {
    seen: HashMap<(Option<String>, String), i64>,
}

impl GenerationFilter {
    fn key(meta: &ObjectMeta) -> (Option<String>, String) {
        (meta.namespace.clone(), meta.name.clone().unwrap_or_default())
    }

    /// Returns true if an applied object should trigger a pass
    pub fn admit_applied(&mut self, meta: &ObjectMeta) -> bool {
        match meta.generation {
            Some(generation) => self.seen.insert(Self::key(meta), generation) != Some(generation),
            None => true,
        }
    }

    /// Forget a deleted object; deletes always trigger a pass
    pub fn admit_deleted(&mut self, meta: &ObjectMeta) -> bool {
        self.seen.remove(&Self::key(meta));
        true
    }
}

/// Subscriber that spawns a metadata watcher per kind
pub struct DynamicWatchSubscriber {
    client: Client,
    resolver: Arc<KindResolver>,
    sender: mpsc::Sender<ObjectRef<BundleInstance>>,
}

impl DynamicWatchSubscriber {
    /// Create a subscriber forwarding owner triggers into `sender`
    pub fn new(
        client: Client,
        resolver: Arc<KindResolver>,
        sender: mpsc::Sender<ObjectRef<BundleInstance>>,
    ) -> Self {
        Self {
            client,
            resolver,
            sender,
        }
    }
}

#[async_trait]
impl KindSubscriber for DynamicWatchSubscriber {
    async fn subscribe(&self, gvk: &GroupVersionKind) -> Result<(), Error> {
        let kind = self
            .resolver
            .resolve(gvk)
            .await
            .map_err(|e| Error::watch(format!("resolve {}: {e}", gvk.kind)))?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &kind.api_resource);
        let sender = self.sender.clone();
        let kind_name = gvk.kind.clone();

        tokio::spawn(async move {
            let mut events = metadata_watcher(api, watcher::Config::default())
                .default_backoff()
                .boxed();
            let mut filter = GenerationFilter::default();

            while let Some(event) = events.next().await {
                let (object, deleted) = match event {
                    Ok(watcher::Event::Apply(o) | watcher::Event::InitApply(o)) => (o, false),
                    Ok(watcher::Event::Delete(o)) => (o, true),
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => continue,
                    Err(e) => {
                        warn!(kind = %kind_name, error = %e, "dynamic watch error");
                        continue;
                    }
                };
                let Some(owner) = owner_of(&object.metadata) else {
                    continue;
                };
                let admitted = if deleted {
                    filter.admit_deleted(&object.metadata)
                } else {
                    filter.admit_applied(&object.metadata)
                };
                if !admitted {
                    continue;
                }

                debug!(kind = %kind_name, owner = %owner.name, deleted, "owned object changed");
                if sender.send(owner).await.is_err() {
                    debug!(kind = %kind_name, "trigger channel closed, stopping watch");
                    break;
                }
            }
        });

        Ok(())
    }
}

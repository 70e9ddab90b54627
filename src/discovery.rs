//! API discovery cache for arbitrary resource kinds
//!
//! Bundles may contain any kind the API server serves, including kinds
//! registered by CRDs shipped in the same Bundle. Kinds are resolved lazily
//! and cached per GroupVersionKind for the lifetime of the process.

use dashmap::DashMap;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::Client;
use tracing::debug;

use crate::Error;

/// A resolved kind: its API resource and whether it is namespaced
#[derive(Clone, Debug)]
pub struct ResolvedKind {
    /// Resource definition used to build dynamic APIs
    pub api_resource: ApiResource,
    /// True for namespaced kinds
    pub namespaced: bool,
}

/// Shared discovery cache keyed by GroupVersionKind
pub struct KindResolver {
    client: Client,
    entries: DashMap<GroupVersionKind, ResolvedKind>,
}

impl KindResolver {
    /// Create an empty resolver
    pub fn new(client: Client) -> Self {
        Self {
            client,
            entries: DashMap::new(),
        }
    }

    /// Resolve a kind, querying the API server on first use.
    ///
    /// Misses are not cached, so a kind whose CRD is installed later
    /// resolves on a subsequent call.
    pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResolvedKind, Error> {
        if let Some(entry) = self.entries.get(gvk) {
            return Ok(entry.clone());
        }

        let (api_resource, caps) = discovery::pinned_kind(&self.client, gvk).await?;
        let resolved = ResolvedKind {
            api_resource,
            namespaced: caps.scope == Scope::Namespaced,
        };
        debug!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            plural = %resolved.api_resource.plural,
            "resolved kind via discovery"
        );
        self.entries.insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }
}

/// GroupVersionKind of a dynamic object, from its type metadata
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::validation("object is missing apiVersion/kind"))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(Error::validation("object is missing apiVersion/kind"));
    }
    let (group, version) = parse_api_version(&types.api_version);
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Split an apiVersion into (group, version); core types have an empty group
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Apply priority of a kind (lower applies first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" => 7,
        _ => 8,
    }
}

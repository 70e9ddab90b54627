//! Release backend
//!
//! A release is a named, versioned record of the manifest content currently
//! applied for one BundleInstance. [`ReleaseClient`] is the backend contract
//! the controller drives; [`state`] decides which operation a pass needs and
//! [`backend`] implements the contract on top of the Kubernetes API.

mod backend;
mod state;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::chart::Chart;
use crate::crd::BundleInstance;

pub use backend::{KubeReleaseClient, KubeReleaseClientGetter};
pub use state::{apply_release_state, evaluate_release_state, ReleaseState};

/// Lifecycle status of a recorded release revision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    /// Applied successfully and current
    Deployed,
    /// Apply failed
    Failed,
    /// Replaced by a newer revision
    Superseded,
    /// Install computed but not yet applied
    PendingInstall,
    /// Upgrade computed but not yet applied
    PendingUpgrade,
}

impl ReleaseStatus {
    /// Returns true if this status forces a corrective upgrade
    pub fn needs_repair(&self) -> bool {
        matches!(self, Self::Failed | Self::Superseded)
    }

    /// Label value form of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One revision of a release
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,
    /// Namespace the release was installed into
    pub namespace: String,
    /// Revision number, starting at 1
    pub version: u32,
    /// Status of this revision
    pub status: ReleaseStatus,
    /// Rendered manifest text
    pub manifest: String,
}

/// Failures of the release backend contract
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReleaseError {
    /// No revision of the release exists
    #[error("release {0} not found")]
    NotFound(String),

    /// Install requested for a release that already exists
    #[error("release {0} already exists")]
    AlreadyExists(String),

    /// A backend handle could not be built for the instance
    #[error("release client: {0}")]
    Client(String),

    /// Rendering, applying or recording failed
    #[error("{0}")]
    Backend(String),
}

impl ReleaseError {
    /// Create a backend error with the given message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Returns true if the release does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Options for a first-time install
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Create the target namespace if it does not exist
    pub create_namespace: bool,
}

/// Options for an upgrade
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Compute the next revision without persisting or applying anything
    pub dry_run: bool,
}

/// Release backend operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Latest revision of the named release
    async fn get(&self, name: &str) -> Result<Release, ReleaseError>;

    /// Install a chart as revision 1 of a new release
    async fn install(
        &self,
        name: &str,
        namespace: &str,
        chart: &Chart,
        options: InstallOptions,
    ) -> Result<Release, ReleaseError>;

    /// Upgrade a release to a new chart
    async fn upgrade(
        &self,
        name: &str,
        namespace: &str,
        chart: &Chart,
        options: UpgradeOptions,
    ) -> Result<Release, ReleaseError>;

    /// Re-assert a release's objects against live state without a new revision
    async fn reconcile(&self, release: &Release) -> Result<(), ReleaseError>;
}

/// Builds a release client scoped to one BundleInstance
#[cfg_attr(test, automock)]
pub trait ReleaseClientGetter: Send + Sync {
    /// Release client acting on behalf of the instance
    fn client_for(&self, instance: &BundleInstance) -> Result<Arc<dyn ReleaseClient>, ReleaseError>;
}

/// Render a chart into release manifest text.
///
/// Templates are concatenated in name order, so the same template set
/// renders identically regardless of loader order.
pub fn render_manifest(chart: &Chart) -> String {
    let mut templates: Vec<_> = chart.templates.iter().collect();
    templates.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    for template in templates {
        out.push_str("---\n# Source: ");
        out.push_str(&template.name);
        out.push('\n');
        out.push_str(&template.data);
        if !template.data.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

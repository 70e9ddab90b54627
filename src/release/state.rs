//! Release state evaluation and application
//!
//! State is derived fresh on every pass from the recorded release and a
//! dry-run upgrade, never cached, so re-running a pass after a crash is safe.

use tracing::{debug, info};

use super::{InstallOptions, Release, ReleaseClient, ReleaseError, UpgradeOptions};
use crate::chart::Chart;
use crate::crd::types::{REASON_INSTALL_FAILED, REASON_RECONCILE_FAILED, REASON_UPGRADE_FAILED};

/// What a pass must do to converge the release
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseState {
    /// No release exists yet
    NeedsInstall,
    /// Desired content differs from the recorded release, or it needs repair
    NeedsUpgrade {
        /// Latest recorded revision
        current: Release,
    },
    /// Recorded release matches the desired content
    Unchanged {
        /// Latest recorded revision
        current: Release,
    },
}

impl ReleaseState {
    /// Condition reason used when applying this state fails
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::NeedsInstall => REASON_INSTALL_FAILED,
            Self::NeedsUpgrade { .. } => REASON_UPGRADE_FAILED,
            Self::Unchanged { .. } => REASON_RECONCILE_FAILED,
        }
    }

    /// Short name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsInstall => "needs-install",
            Self::NeedsUpgrade { .. } => "needs-upgrade",
            Self::Unchanged { .. } => "unchanged",
        }
    }
}

/// Decide whether the release needs an install, an upgrade, or only a heal.
///
/// The dry-run manifest is compared byte-for-byte with the recorded one. A
/// failed or superseded release is upgraded even when the text matches.
pub async fn evaluate_release_state(
    client: &dyn ReleaseClient,
    name: &str,
    namespace: &str,
    chart: &Chart,
) -> Result<ReleaseState, ReleaseError> {
    let current = match client.get(name).await {
        Ok(release) => release,
        Err(e) if e.is_not_found() => return Ok(ReleaseState::NeedsInstall),
        Err(e) => return Err(e),
    };

    let desired = client
        .upgrade(name, namespace, chart, UpgradeOptions { dry_run: true })
        .await?;

    let state = if desired.manifest != current.manifest || current.status.needs_repair() {
        ReleaseState::NeedsUpgrade { current }
    } else {
        ReleaseState::Unchanged { current }
    };
    debug!(release = %name, state = state.as_str(), "evaluated release state");
    Ok(state)
}

/// Perform the operation the evaluated state calls for
pub async fn apply_release_state(
    client: &dyn ReleaseClient,
    state: &ReleaseState,
    name: &str,
    namespace: &str,
    chart: &Chart,
) -> Result<(), ReleaseError> {
    match state {
        ReleaseState::NeedsInstall => {
            let release = client
                .install(name, namespace, chart, InstallOptions::default())
                .await?;
            info!(release = %name, version = release.version, "installed release");
        }
        ReleaseState::NeedsUpgrade { current } => {
            let release = client
                .upgrade(name, namespace, chart, UpgradeOptions { dry_run: false })
                .await?;
            info!(
                release = %name,
                from = current.version,
                to = release.version,
                "upgraded release"
            );
        }
        ReleaseState::Unchanged { current } => {
            client.reconcile(current).await?;
            debug!(release = %name, version = current.version, "reconciled release");
        }
    }
    Ok(())
}

//! Shared types for Plank CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Condition vocabulary
// =============================================================================

/// The BundleInstance references a Bundle that exists and could be read
pub const TYPE_HAS_VALID_BUNDLE: &str = "HasValidBundle";
/// The referenced Bundle's content could not be turned into a chart
pub const TYPE_INVALID_BUNDLE_CONTENT: &str = "InvalidBundleContent";
/// The Bundle's content is installed as a release
pub const TYPE_INSTALLED: &str = "Installed";

/// The referenced Bundle could not be fetched
pub const REASON_BUNDLE_LOOKUP_FAILED: &str = "BundleLookupFailed";
/// The referenced Bundle's content could not be loaded from storage
pub const REASON_BUNDLE_LOAD_FAILED: &str = "BundleLoadFailed";
/// A manifest object could not be serialized into a template
pub const REASON_READING_CONTENT_FAILED: &str = "ReadingContentFailed";
/// No release client could be obtained for the instance
pub const REASON_ERROR_GETTING_CLIENT: &str = "ErrorGettingClient";
/// The dry-run comparison against the current release failed
pub const REASON_ERROR_GETTING_RELEASE_STATE: &str = "ErrorGettingReleaseState";
/// First-time install failed
pub const REASON_INSTALL_FAILED: &str = "InstallFailed";
/// Upgrade of an existing release failed
pub const REASON_UPGRADE_FAILED: &str = "UpgradeFailed";
/// Re-asserting an unchanged release against live state failed
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";
/// A watch for a newly produced resource kind could not be established
pub const REASON_CREATE_DYNAMIC_WATCH_FAILED: &str = "CreateDynamicWatchFailed";
/// The whole pass completed
pub const REASON_INSTALLATION_SUCCEEDED: &str = "InstallationSucceeded";

/// Prefix of the `Installed` reason used while the Bundle is not unpacked
pub const REASON_BUNDLE_UNPACK_PREFIX: &str = "BundleUnpack";
/// `Installed` reason while the Bundle is actively unpacking
pub const REASON_BUNDLE_UNPACK_RUNNING: &str = "BundleUnpackRunning";

// =============================================================================
// Bundle phase
// =============================================================================

/// Unpack lifecycle phase of a Bundle
///
/// Owned by the unpacking subsystem; this controller only reads it.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum BundlePhase {
    /// Waiting for an unpacker to pick the Bundle up
    Pending,
    /// Content is being unpacked into storage
    Unpacking,
    /// Content is available in storage
    Unpacked,
    /// Unpacking failed
    Failing,
}

impl std::fmt::Display for BundlePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Unpacking => write!(f, "Unpacking"),
            Self::Unpacked => write!(f, "Unpacked"),
            Self::Failing => write!(f, "Failing"),
        }
    }
}

/// `Installed` condition reason for a Bundle that is not unpacked yet.
///
/// An unset phase yields the bare prefix.
pub fn unpack_wait_reason(phase: Option<BundlePhase>) -> String {
    match phase {
        Some(BundlePhase::Unpacking) => REASON_BUNDLE_UNPACK_RUNNING.to_string(),
        Some(phase) => format!("{REASON_BUNDLE_UNPACK_PREFIX}{phase}"),
        None => REASON_BUNDLE_UNPACK_PREFIX.to_string(),
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Installed, HasValidBundle)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Upsert `condition` into `conditions` by type.
///
/// Other condition types are left untouched. When the status value is
/// unchanged the previous transition time is kept.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

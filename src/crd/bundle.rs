//! Bundle Custom Resource Definition
//!
//! A Bundle describes where a set of plain Kubernetes manifests comes from.
//! The unpacking subsystem owns its status; this controller only reads the
//! phase to decide whether content can be loaded from storage.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BundlePhase, Condition};

/// Specification for a Bundle
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "plank.dev",
    version = "v1alpha1",
    kind = "Bundle",
    plural = "bundles",
    shortname = "bd",
    status = "BundleStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.source.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Name of the provisioner that unpacks and installs this Bundle
    pub provisioner_class_name: String,

    /// Where the Bundle content comes from
    pub source: BundleSource,
}

/// Kind of content source backing a Bundle
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Container image holding the manifests
    Image,
    /// Git repository holding the manifests
    Git,
}

/// Content source for a Bundle
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleSource {
    /// Which of the source fields is populated
    #[serde(rename = "type")]
    pub type_: SourceType,

    /// Image source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSource>,

    /// Git source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
}

/// Container image reference
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ImageSource {
    /// Image reference (tag or digest)
    #[serde(rename = "ref")]
    pub ref_: String,
}

/// Git repository location
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Repository URL
    pub repository: String,

    /// Directory inside the repository holding the manifests (defaults to `./manifests`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Exactly one of branch, tag or commit
    #[serde(rename = "ref")]
    pub ref_: GitRef,
}

/// Git revision selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct GitRef {
    /// Branch to check out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Tag to check out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Commit to check out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Status for a Bundle, written by the unpacker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    /// Unpack phase; unset until an unpacker observes the Bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BundlePhase>,

    /// Digest of the resolved source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Summary of the unpacked content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<BundleInfo>,

    /// Generation last observed by the unpacker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Unpack conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Description of unpacked Bundle content
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BundleInfo {
    /// Package the content belongs to
    pub package: String,
    /// Bundle name inside the package
    pub name: String,
    /// Bundle version
    pub version: String,
    /// Objects contained in the Bundle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<BundleObject>,
}

/// Identity of one object contained in a Bundle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BundleObject {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
    /// Object name
    pub name: String,
    /// Object namespace (empty for cluster-scoped objects)
    #[serde(default)]
    pub namespace: String,
}

impl Bundle {
    /// Current unpack phase, if the unpacker has written one
    pub fn phase(&self) -> Option<BundlePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Returns true when content can be loaded from storage
    pub fn is_unpacked(&self) -> bool {
        self.phase() == Some(BundlePhase::Unpacked)
    }
}

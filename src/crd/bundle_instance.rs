//! BundleInstance Custom Resource Definition
//!
//! A BundleInstance is a request to install exactly one Bundle. The
//! controller records progress through conditions and advances
//! `installedBundleName` only after a fully successful pass.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{set_condition, Condition};

/// Specification for a BundleInstance
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "plank.dev",
    version = "v1alpha1",
    kind = "BundleInstance",
    plural = "bundleinstances",
    shortname = "bi",
    status = "BundleInstanceStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Bundle","type":"string","jsonPath":".spec.bundleName"}"#,
    printcolumn = r#"{"name":"Installed","type":"string","jsonPath":".status.installedBundleName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleInstanceSpec {
    /// Name of the provisioner that should reconcile this instance
    pub provisioner_class_name: String,

    /// Name of the Bundle to install
    pub bundle_name: String,
}

/// Status for a BundleInstance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleInstanceStatus {
    /// Conditions, one entry per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Bundle most recently installed in full
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_bundle_name: Option<String>,
}

impl BundleInstanceStatus {
    /// Upsert a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    /// Upsert a condition by type
    pub fn set_condition(&mut self, condition: Condition) {
        set_condition(&mut self.conditions, condition);
    }
}

impl BundleInstance {
    /// Returns true if this instance is meant for the given provisioner
    pub fn is_provisioned_by(&self, provisioner_id: &str) -> bool {
        self.spec.provisioner_class_name == provisioner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::{ConditionStatus, TYPE_HAS_VALID_BUNDLE, TYPE_INSTALLED};
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_round_trips_camel_case() {
        let yaml = "provisionerClassName: plank.dev/plain\nbundleName: pkg-a\n";
        let spec: BundleInstanceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.bundle_name, "pkg-a");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["bundleName"], "pkg-a");
    }

    #[test]
    fn test_empty_status_serializes_to_empty_object() {
        let json = serde_json::to_value(BundleInstanceStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_status_chaining_upserts_by_type() {
        let status = BundleInstanceStatus::default()
            .condition(Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::False,
                "BundleLookupFailed",
                "missing",
            ))
            .condition(Condition::new(
                TYPE_INSTALLED,
                ConditionStatus::False,
                "BundleUnpackPending",
                "",
            ))
            .condition(Condition::new(
                TYPE_HAS_VALID_BUNDLE,
                ConditionStatus::True,
                "Found",
                "",
            ));

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_provisioner_filter() {
        let instance = BundleInstance::new(
            "inst-a",
            BundleInstanceSpec {
                provisioner_class_name: "plank.dev/plain".to_string(),
                bundle_name: "pkg-a".to_string(),
            },
        );
        assert!(instance.is_provisioned_by(crate::PROVISIONER_ID));
        assert!(!instance.is_provisioned_by("other.dev/helm"));
    }

    #[test]
    fn test_crd_names() {
        let crd = BundleInstance::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "BundleInstance");
        assert_eq!(
            crd.spec.names.short_names.as_deref(),
            Some(&["bi".to_string()][..])
        );
    }
}

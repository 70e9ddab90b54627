//! Chart materialization
//!
//! Turns labeled manifest objects into a content-addressed template set. Each
//! object is serialized to YAML and named after a prefix of the SHA-256 of
//! those bytes, so identical objects always produce identical template names.

use std::collections::HashSet;

use kube::api::DynamicObject;
use sha2::{Digest, Sha256};

use crate::Error;

/// Number of digest bytes used in a template name (16 hex characters)
const NAME_DIGEST_BYTES: usize = 8;

/// One serialized manifest object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateEntry {
    /// `object-<hex>.yaml`, derived from the digest alone
    pub name: String,
    /// Hex-encoded SHA-256 of `data`
    pub digest: String,
    /// Canonical YAML serialization of the object
    pub data: String,
}

impl TemplateEntry {
    /// Build an entry from serialized bytes
    pub fn from_data(data: String) -> Self {
        let hash = Sha256::digest(data.as_bytes());
        Self {
            name: format!("object-{}.yaml", hex::encode(&hash[..NAME_DIGEST_BYTES])),
            digest: hex::encode(hash),
            data,
        }
    }
}

/// An installable unit: the ordered template set of one Bundle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chart {
    /// Templates in loader order
    pub templates: Vec<TemplateEntry>,
}

impl Chart {
    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if the chart holds no templates
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template names in loader order
    pub fn template_names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Serialize one object into its template entry
pub fn template_for(object: &DynamicObject) -> Result<TemplateEntry, Error> {
    let data = serde_yaml::to_string(object).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(TemplateEntry::from_data(data))
}

/// Materialize objects into a chart, preserving their order.
///
/// Any serialization failure aborts the whole chart. Two byte-identical
/// objects would collide on one template name and are rejected.
pub fn materialize(objects: &[DynamicObject]) -> Result<Chart, Error> {
    let mut seen = HashSet::with_capacity(objects.len());
    let mut templates = Vec::with_capacity(objects.len());

    for object in objects {
        let entry = template_for(object)?;
        if !seen.insert(entry.name.clone()) {
            return Err(Error::serialization(format!(
                "duplicate object in bundle content (template {})",
                entry.name
            )));
        }
        templates.push(entry);
    }

    Ok(Chart { templates })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::apply_owner_labels;
    use crate::storage::parse_manifests;

    fn objects() -> Vec<DynamicObject> {
        let mut objects = parse_manifests(
            r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: apps
data:
  mode: fast
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings-copy
  namespace: apps
data:
  mode: fast
"#,
        )
        .unwrap();
        apply_owner_labels(&mut objects, "inst-a");
        objects
    }

    #[test]
    fn test_template_name_format() {
        let chart = materialize(&objects()).unwrap();
        for template in &chart.templates {
            let hex = template
                .name
                .strip_prefix("object-")
                .and_then(|s| s.strip_suffix(".yaml"))
                .unwrap();
            assert_eq!(hex.len(), 16);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(template.digest.starts_with(hex));
            assert_eq!(template.digest.len(), 64);
        }
    }

    /// Story: identical objects always hash to identical template names
    #[test]
    fn story_materialization_is_deterministic() {
        let first = materialize(&objects()).unwrap();
        let second = materialize(&objects()).unwrap();
        assert_eq!(first, second);
    }

    /// Story: objects differing only in identity fields get distinct names
    #[test]
    fn story_identity_fields_are_part_of_the_hash() {
        let chart = materialize(&objects()).unwrap();
        assert_eq!(chart.len(), 2);
        assert_ne!(chart.templates[0].name, chart.templates[1].name);
    }

    #[test]
    fn story_owner_labels_change_the_hash() {
        let mut other = objects();
        apply_owner_labels(&mut other, "inst-b");
        let a = materialize(&objects()).unwrap();
        let b = materialize(&other).unwrap();
        assert_ne!(a.templates[0].name, b.templates[0].name);
    }

    #[test]
    fn test_loader_order_is_preserved() {
        let forward = materialize(&objects()).unwrap();
        let mut reversed_objects = objects();
        reversed_objects.reverse();
        let reversed = materialize(&reversed_objects).unwrap();

        let mut expected = forward.template_names();
        expected.reverse();
        assert_eq!(reversed.template_names(), expected);
    }

    #[test]
    fn test_serialized_form_carries_identity() {
        let entry = template_for(&objects()[0]).unwrap();
        assert!(entry.data.contains("apiVersion: v1"));
        assert!(entry.data.contains("kind: ConfigMap"));
        assert!(entry.data.contains("name: settings"));
        assert!(entry.data.contains("plank.dev/owner-name: inst-a"));
    }

    #[test]
    fn test_duplicate_objects_are_rejected() {
        let mut duplicated = objects();
        duplicated.push(duplicated[0].clone());
        let err = materialize(&duplicated).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_empty_bundle_yields_empty_chart() {
        let chart = materialize(&[]).unwrap();
        assert!(chart.is_empty());
    }
}

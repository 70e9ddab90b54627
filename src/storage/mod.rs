//! Bundle content storage
//!
//! Unpackers write the manifests of a Bundle into storage; the controller
//! reads them back as an ordered sequence of [`DynamicObject`]s.
//! [`ConfigMapStorage`] keeps one ConfigMap per Bundle in a storage namespace.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Bundle, BundlePhase};

/// Label on storage ConfigMaps naming the Bundle they hold
pub const BUNDLE_NAME_LABEL: &str = "plank.dev/bundle-name";

/// Data key used when storing content
const OBJECTS_KEY: &str = "objects.yaml";

/// Failures of the storage contract
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// Bundle is not in the Unpacked phase
    #[error("bundle is not unpacked (phase {0:?})")]
    NotUnpacked(Option<BundlePhase>),

    /// Stored content is missing or unreadable
    #[error("read bundle content: {0}")]
    Read(String),

    /// Content could not be written
    #[error("write bundle content: {0}")]
    Write(String),
}

/// Storage for unpacked Bundle content
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Load the ordered objects of an unpacked Bundle
    async fn load(&self, bundle: &Bundle) -> Result<Vec<DynamicObject>, StorageError>;

    /// Store the objects of a Bundle, replacing any previous content
    async fn store(&self, bundle: &Bundle, objects: &[DynamicObject]) -> Result<(), StorageError>;
}

/// Name of the ConfigMap holding a Bundle's content
pub fn configmap_name(bundle_name: &str) -> String {
    format!("bundle-{bundle_name}")
}

/// Parse a multi-document YAML manifest into objects, keeping document order.
///
/// Empty documents are skipped.
pub fn parse_manifests(input: &str) -> Result<Vec<DynamicObject>, StorageError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_json::Value::deserialize(document)
            .map_err(|e| StorageError::Read(format!("invalid YAML: {e}")))?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_json::from_value(value)
            .map_err(|e| StorageError::Read(format!("invalid object: {e}")))?;
        objects.push(object);
    }
    Ok(objects)
}

/// Read all objects out of ConfigMap data, files in key order.
pub fn objects_from_data(
    data: &BTreeMap<String, String>,
) -> Result<Vec<DynamicObject>, StorageError> {
    let mut objects = Vec::new();
    for (key, content) in data {
        let parsed = parse_manifests(content)
            .map_err(|e| StorageError::Read(format!("{key}: {e}")))?;
        objects.extend(parsed);
    }
    Ok(objects)
}

/// Render objects into a single multi-document YAML string
pub fn render_objects(objects: &[DynamicObject]) -> Result<String, StorageError> {
    let mut out = String::new();
    for object in objects {
        let doc = serde_yaml::to_string(object).map_err(|e| StorageError::Write(e.to_string()))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

/// ConfigMap-backed Bundle storage
pub struct ConfigMapStorage {
    client: Client,
    namespace: String,
}

impl ConfigMapStorage {
    /// Create storage rooted in the given namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl BundleStorage for ConfigMapStorage {
    async fn load(&self, bundle: &Bundle) -> Result<Vec<DynamicObject>, StorageError> {
        if !bundle.is_unpacked() {
            return Err(StorageError::NotUnpacked(bundle.phase()));
        }

        let name = configmap_name(&bundle.name_any());
        let cm = self
            .api()
            .get(&name)
            .await
            .map_err(|e| StorageError::Read(format!("get configmap {name}: {e}")))?;

        let objects = objects_from_data(&cm.data.unwrap_or_default())?;
        debug!(bundle = %bundle.name_any(), count = objects.len(), "loaded bundle content");
        Ok(objects)
    }

    async fn store(&self, bundle: &Bundle, objects: &[DynamicObject]) -> Result<(), StorageError> {
        let bundle_name = bundle.name_any();
        let name = configmap_name(&bundle_name);
        let content = render_objects(objects)?;

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    BUNDLE_NAME_LABEL.to_string(),
                    bundle_name.clone(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(OBJECTS_KEY.to_string(), content)])),
            ..Default::default()
        };

        self.api()
            .patch(
                &name,
                &PatchParams::apply(crate::FIELD_MANAGER).force(),
                &Patch::Apply(&cm),
            )
            .await
            .map_err(|e| StorageError::Write(format!("apply configmap {name}: {e}")))?;

        debug!(bundle = %bundle_name, count = objects.len(), "stored bundle content");
        Ok(())
    }
}

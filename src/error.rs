//! Error types for the Plank controller

use thiserror::Error;

use crate::crd::BundlePhase;
use crate::release::ReleaseError;
use crate::storage::StorageError;

/// Main error type for Plank operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Referenced Bundle is not unpacked yet
    #[error("{}", not_unpacked_message(.0))]
    BundleNotUnpacked(Option<BundlePhase>),

    /// Bundle content could not be read from storage
    #[error("load bundle objects: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Release backend error
    #[error("release error: {0}")]
    Release(#[from] ReleaseError),

    /// Dynamic watch could not be established
    #[error("watch error: {0}")]
    Watch(String),

    /// Invalid object or resource definition
    #[error("validation error: {0}")]
    Validation(String),
}

fn not_unpacked_message(phase: &Option<BundlePhase>) -> String {
    const BASE: &str = "bundle is not yet unpacked";
    match phase {
        Some(phase) => format!("{BASE}, current phase={phase}"),
        None => BASE.to_string(),
    }
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a watch registration error with the given message
    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns true if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotUnpacked(phase) => Self::BundleNotUnpacked(phase),
            other => Self::Storage(other.to_string()),
        }
    }
}

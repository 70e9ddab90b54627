//! Plank - CRD-driven Kubernetes controller for plain manifest bundles
//!
//! Plank installs the content of a [`crd::Bundle`] as a versioned release on
//! behalf of a [`crd::BundleInstance`], and keeps that release converged.
//!
//! # Architecture
//!
//! Each reconciliation pass runs:
//! - content loading and owner labeling ([`loader`], [`storage`])
//! - chart materialization into content-addressed templates ([`chart`])
//! - release state evaluation by dry-run comparison, then install, upgrade
//!   or heal ([`release`])
//! - dynamic watch registration for every installed kind ([`watch`])
//! - status reporting as conditions on the BundleInstance ([`controller`])
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Bundle, BundleInstance)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`storage`] - Unpacked bundle content storage
//! - [`loader`] - Bundle loading and ownership labels
//! - [`chart`] - Chart materialization
//! - [`release`] - Release backend and state machine
//! - [`watch`] - Dynamic watch registry
//! - [`discovery`] - API discovery cache
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod chart;
pub mod controller;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod release;
pub mod storage;
pub mod watch;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Identity Constants
// =============================================================================

/// API group of the Plank CRDs
pub const API_GROUP: &str = "plank.dev";

/// apiVersion of the Plank CRDs
pub const API_VERSION: &str = "plank.dev/v1alpha1";

/// Provisioner class this controller reconciles
pub const PROVISIONER_ID: &str = "plank.dev/plain";

/// Field manager for every server-side apply this controller performs
pub const FIELD_MANAGER: &str = PROVISIONER_ID;

/// Owner kind recorded on installed objects
pub const OWNER_KIND: &str = "BundleInstance";

/// Label naming the kind of the owning resource
pub const OWNER_KIND_LABEL: &str = "plank.dev/owner-kind";

/// Label naming the owning BundleInstance
pub const OWNER_NAME_LABEL: &str = "plank.dev/owner-name";

//! Integration tests for the Plank controller
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how a bundle moves from stored content to an installed release.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and reading Bundle and
//!   BundleInstance resources through the Kubernetes API
//!
//! - `bundle_install`: Stories about the controller installing, upgrading and
//!   healing releases on a live cluster
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod bundle_install;
mod crd_operations;
mod helpers;

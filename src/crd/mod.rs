//! Custom Resource Definitions for Plank
//!
//! This module contains all CRD definitions used by the Plank controller.

mod bundle;
mod bundle_instance;
pub mod types;

pub use bundle::{
    Bundle, BundleInfo, BundleObject, BundleSource, BundleSpec, BundleStatus, GitRef, GitSource,
    ImageSource, SourceType,
};
pub use bundle_instance::{BundleInstance, BundleInstanceSpec, BundleInstanceStatus};
pub use types::{BundlePhase, Condition, ConditionStatus};

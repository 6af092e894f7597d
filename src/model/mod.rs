//! Cluster configuration models
//!
//! Strongly typed desired state for every supported engine, plus the
//! manifest envelope submitted to the control plane.

pub mod common;
pub mod manifest;
pub mod psmdb;
pub mod pxc;

pub use common::*;
pub use manifest::{Manifest, ManifestMeta};
pub use psmdb::{PsmdbClusterSpec, ReplsetSpec};
pub use pxc::{PxcClusterSpec, PxcPodSpec};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A nested configuration model the option overlay engine can address
pub trait ConfigModel:
    Serialize + DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static
{
    /// Desired state of a freshly created cluster called `name`
    fn defaults(name: &str) -> Self;

    /// One line description used in progress output
    fn summary(&self) -> String;
}

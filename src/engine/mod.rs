//! Database Engines
//!
//! Each engine bundles what the reconciliation core needs to know about one
//! database operator:
//! - the custom resource kinds it reconciles
//! - the operator's prerequisite bundle and log identities
//! - manifest production for every operation
//! - status classification

pub mod codec;
pub mod psmdb;
pub mod pxc;
pub mod registry;
pub mod status;

pub use codec::ModelCodec;
pub use psmdb::{PsmdbConfig, PsmdbEngine};
pub use pxc::{PxcConfig, PxcEngine};
pub use registry::EngineRegistry;
pub use status::{ClusterStatusClassifier, JobStatusClassifier};

use crate::domain::ports::{ResourceKind, StatusClassifierRef};
use crate::error::Result;
use crate::options::OptionIndex;
use serde::Deserialize;
use std::sync::Arc;

/// Where the operator runs and how it names itself in its logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    /// Label selector of the operator pods
    pub label_selector: String,
    /// Controller id on cluster reconcile records
    pub cluster_controller: String,
    /// Controller id on backup reconcile records
    pub backup_controller: String,
    /// Controller id on restore reconcile records
    pub restore_controller: String,
}

/// One database engine at one operator version
pub trait Engine: Send + Sync {
    /// Short engine name, e.g. `pxc`
    fn name(&self) -> &str;

    /// Operator version this engine targets
    fn version(&self) -> &str;

    fn cluster_kind(&self) -> &ResourceKind;
    fn backup_kind(&self) -> &ResourceKind;
    fn restore_kind(&self) -> &ResourceKind;

    fn controller(&self) -> &ControllerRef;

    /// Prerequisite documents applied before any cluster change
    fn bundle(&self) -> &[String];

    /// Option index of the cluster model
    fn options(&self) -> &OptionIndex;

    /// Manifest for a new cluster: defaults overlaid with `overrides`
    fn create_manifest(&self, name: &str, overrides: &str) -> Result<String>;

    /// Manifest for an existing cluster: `current` overlaid with `overrides`
    fn edit_manifest(&self, current: &[u8], overrides: &str) -> Result<String>;

    /// Overrides that move a cluster to `version`
    fn upgrade_overrides(&self, version: &str) -> Result<String>;

    fn backup_manifest(&self, cluster: &str, backup: &str, storage: &str) -> Result<String>;
    fn restore_manifest(&self, cluster: &str, restore: &str, backup: &str) -> Result<String>;

    fn cluster_classifier(&self) -> StatusClassifierRef;

    /// Classifier for backup and restore objects
    fn job_classifier(&self) -> StatusClassifierRef;
}

pub type EngineRef = Arc<dyn Engine>;

/// Split a multi-document YAML text into its non-empty documents
pub fn split_documents(text: &str) -> Result<Vec<String>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        documents.push(serde_yaml::to_string(&value)?);
    }
    Ok(documents)
}

/// Documents of an operator bundle with its placeholders filled in
pub(crate) fn render_bundle(template: &str, operator_image: &str, namespace: &str) -> Result<Vec<String>> {
    ensure_plain_value("operator image", operator_image)?;
    if namespace.trim().is_empty() {
        return Err(crate::error::Error::Configuration(
            "operator namespace must not be empty".to_string(),
        ));
    }
    split_documents(
        &template
            .replace("{{OPERATOR_IMAGE}}", operator_image)
            .replace("{{NAMESPACE}}", namespace),
    )
}

/// Reject values the override grammar cannot carry
pub(crate) fn ensure_plain_value(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains([',', '=', ';']) {
        return Err(crate::error::Error::Configuration(format!(
            "{} {:?} must be non-empty and free of ',', '=' and ';'",
            what, value
        )));
    }
    Ok(())
}

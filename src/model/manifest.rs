//! Manifest envelope
//!
//! Wraps a spec in the `apiVersion` / `kind` / `metadata` header the control
//! plane expects and renders it as YAML.

use crate::domain::ports::{ManifestRenderer, ResourceKind};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label stamped on every object this tool creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "dbaas-provisioner";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Typed custom resource document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMeta,
    pub spec: S,
}

impl<S> Manifest<S> {
    /// New manifest for `kind` named `name`
    pub fn new(kind: &ResourceKind, name: &str, spec: S) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        Self {
            api_version: kind.api_version(),
            kind: kind.kind.clone(),
            metadata: ManifestMeta {
                name: name.to_string(),
                namespace: None,
                labels,
            },
            spec,
        }
    }
}

impl<S: DeserializeOwned> Manifest<S> {
    /// Decode the current remote object, dropping server-managed metadata
    /// and status
    pub fn from_remote(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Manifest(format!("cannot decode remote object: {}", e)))
    }
}

impl<S: Serialize> ManifestRenderer for Manifest<S> {
    fn render(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind() -> ResourceKind {
        ResourceKind::new("pxc.percona.com", "v1", "PerconaXtraDBCluster", "perconaxtradbclusters")
    }

    #[test]
    fn test_render_header() {
        let manifest = Manifest::new(&kind(), "db1", json!({"pxc": {"size": 3}}));
        let yaml = manifest.render().unwrap();

        assert!(yaml.contains("apiVersion: pxc.percona.com/v1"));
        assert!(yaml.contains("kind: PerconaXtraDBCluster"));
        assert!(yaml.contains("name: db1"));
        assert!(yaml.contains("app.kubernetes.io/managed-by: dbaas-provisioner"));
    }

    #[test]
    fn test_from_remote_drops_server_fields() {
        let remote = json!({
            "apiVersion": "pxc.percona.com/v1",
            "kind": "PerconaXtraDBCluster",
            "metadata": {
                "name": "db1",
                "namespace": "default",
                "resourceVersion": "1234",
                "managedFields": []
            },
            "spec": {"pxc": {"size": 5}},
            "status": {"state": "ready"}
        });
        let bytes = serde_json::to_vec(&remote).unwrap();
        let manifest: Manifest<serde_json::Value> = Manifest::from_remote(&bytes).unwrap();

        assert_eq!(manifest.metadata.name, "db1");
        assert_eq!(manifest.spec["pxc"]["size"], 5);
        let yaml = manifest.render().unwrap();
        assert!(!yaml.contains("resourceVersion"));
        assert!(!yaml.contains("status"));
    }

    #[test]
    fn test_from_remote_rejects_garbage() {
        let err = Manifest::<serde_json::Value>::from_remote(b"not json").unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }
}

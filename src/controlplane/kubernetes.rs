//! Kubernetes Control Plane Adapter
//!
//! Implements [`ControlPlaneClient`] over the Kubernetes API. Manifests are
//! applied server-side as dynamic objects, so any kind the cluster knows
//! (CRDs, RBAC, deployments, custom resources) goes through the same path.

use crate::domain::ports::{ControlPlaneClient, ResourceKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
};
use kube::core::GroupVersionKind;
use kube::discovery::{self, Scope};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPlaneConfig {
    /// Namespace holding the clusters and their operator
    pub namespace: String,
    /// Field manager recorded on server-side apply
    pub field_manager: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            field_manager: crate::NAME.to_string(),
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

pub struct KubeControlPlane {
    client: Client,
    config: ControlPlaneConfig,
    /// Discovered resource and scope per `group/version/kind`
    discovered: DashMap<String, (ApiResource, Scope)>,
}

impl KubeControlPlane {
    pub fn new(client: Client, config: ControlPlaneConfig) -> Self {
        Self {
            client,
            config,
            discovered: DashMap::new(),
        }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials
    pub async fn connect(config: ControlPlaneConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes, namespace {}", config.namespace);
        Ok(Self::new(client, config))
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(found) = self.discovered.get(&key) {
            return Ok(found.clone());
        }
        let (resource, capabilities) = discovery::pinned_kind(&self.client, gvk).await?;
        debug!("Discovered {} as {:?}", key, capabilities.scope);
        let entry = (resource, capabilities.scope);
        self.discovered.insert(key, entry.clone());
        Ok(entry)
    }

    fn custom_api(&self, kind: &ResourceKind) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.config.namespace,
            &api_resource(kind),
        )
    }

    async fn apply_object(&self, object: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(object)?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Manifest(format!("{} document has no metadata.name", gvk.kind)))?;
        let (resource, scope) = self.resolve(&gvk).await?;

        let api: Api<DynamicObject> = match scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
            Scope::Namespaced => {
                let namespace = object
                    .metadata
                    .namespace
                    .as_deref()
                    .unwrap_or(&self.config.namespace);
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
        };

        let params = PatchParams::apply(&self.config.field_manager).force();
        api.patch(name, &params, &Patch::Apply(object)).await?;
        debug!("Applied {}/{}", gvk.kind, name);
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlane {
    async fn apply(&self, manifest: &str) -> Result<()> {
        for object in parse_documents(manifest)? {
            self.apply_object(&object).await?;
        }
        Ok(())
    }

    async fn get(&self, kind: &ResourceKind, name: &str) -> Result<Option<Vec<u8>>> {
        match self.custom_api(kind).get_opt(name).await? {
            Some(object) => Ok(Some(serde_json::to_vec(&object)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, kind: &ResourceKind, name: &str) -> Result<()> {
        match self
            .custom_api(kind)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deletion of {}/{} requested", kind, name);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => Err(Error::NotFound {
                kind: kind.kind.clone(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(&self, controller_label: &str) -> Result<Vec<u8>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let listed = pods
            .list(&ListParams::default().labels(controller_label))
            .await?;

        let names: Vec<String> = listed
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect();
        let params = LogParams::default();
        let texts =
            future::try_join_all(names.iter().map(|name| pods.logs(name, &params))).await?;

        let mut log = Vec::new();
        for text in texts {
            log.extend_from_slice(text.as_bytes());
            if !text.ends_with('\n') {
                log.push(b'\n');
            }
        }
        Ok(log)
    }
}

// =============================================================================
// Manifest Helpers
// =============================================================================

/// API resource of a custom resource kind
pub fn api_resource(kind: &ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, &kind.plural)
}

/// Group, version and kind from an object's type header
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::Manifest("document has no apiVersion/kind".to_string()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    if version.is_empty() || types.kind.is_empty() {
        return Err(Error::Manifest(format!(
            "invalid type header {}/{}",
            types.api_version, types.kind
        )));
    }
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Every non-empty document of a multi-document YAML text
pub fn parse_documents(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

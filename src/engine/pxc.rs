//! Percona XtraDB Cluster engine

use super::codec::ModelCodec;
use super::status::{ClusterStatusClassifier, JobStatusClassifier};
use super::{ensure_plain_value, render_bundle, ControllerRef, Engine};
use crate::domain::ports::{ManifestRenderer, ResourceKind, StatusClassifierRef};
use crate::error::Result;
use crate::model::pxc::{
    PxcBackupRequest, PxcClusterSpec, PxcRestoreRequest, BACKUP_IMAGE, PROXYSQL_IMAGE, PXC_IMAGE,
};
use crate::model::Manifest;
use crate::options::OptionIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const GROUP: &str = "pxc.percona.com";
const BUNDLE: &str = include_str!("../../bundles/pxc-operator.yaml");

/// Images and operator release the PXC engine deploys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PxcConfig {
    pub operator_version: String,
    pub operator_image: String,
    pub pxc_image: String,
    pub proxysql_image: String,
    pub backup_image: String,
}

impl Default for PxcConfig {
    fn default() -> Self {
        Self {
            operator_version: "1.5.0".to_string(),
            operator_image: "percona/percona-xtradb-cluster-operator:1.5.0".to_string(),
            pxc_image: PXC_IMAGE.to_string(),
            proxysql_image: PROXYSQL_IMAGE.to_string(),
            backup_image: BACKUP_IMAGE.to_string(),
        }
    }
}

pub struct PxcEngine {
    config: PxcConfig,
    codec: ModelCodec<PxcClusterSpec>,
    backup_kind: ResourceKind,
    restore_kind: ResourceKind,
    controller: ControllerRef,
    bundle: Vec<String>,
    cluster_classifier: StatusClassifierRef,
    job_classifier: StatusClassifierRef,
}

impl PxcEngine {
    /// Engine whose operator runs in `namespace`
    pub fn new(config: PxcConfig, namespace: &str) -> Result<Self> {
        for (what, image) in [
            ("pxc image", &config.pxc_image),
            ("proxysql image", &config.proxysql_image),
            ("backup image", &config.backup_image),
        ] {
            ensure_plain_value(what, image)?;
        }

        let cluster_kind = ResourceKind::new(GROUP, "v1", "PerconaXtraDBCluster", "perconaxtradbclusters");
        let bundle = render_bundle(BUNDLE, &config.operator_image, namespace)?;

        Ok(Self {
            codec: ModelCodec::new(cluster_kind)?,
            backup_kind: ResourceKind::new(
                GROUP,
                "v1",
                "PerconaXtraDBClusterBackup",
                "perconaxtradbclusterbackups",
            ),
            restore_kind: ResourceKind::new(
                GROUP,
                "v1",
                "PerconaXtraDBClusterRestore",
                "perconaxtradbclusterrestores",
            ),
            controller: ControllerRef {
                label_selector: "name=percona-xtradb-cluster-operator".to_string(),
                cluster_controller: "perconaxtradbcluster-controller".to_string(),
                backup_controller: "perconaxtradbclusterbackup-controller".to_string(),
                restore_controller: "perconaxtradbclusterrestore-controller".to_string(),
            },
            bundle,
            cluster_classifier: Arc::new(ClusterStatusClassifier {
                port: 3306,
                user: "root",
                secret_pointer: "/spec/secretsName",
                components: &["pxc", "proxysql"],
            }),
            job_classifier: Arc::new(JobStatusClassifier {
                ready_states: &["Succeeded"],
                error_states: &["Failed"],
            }),
            config,
        })
    }

    /// Overrides pinning the configured images
    fn image_overrides(&self) -> String {
        format!(
            "pxc.image={},proxysql.image={},backup.image={}",
            self.config.pxc_image, self.config.proxysql_image, self.config.backup_image
        )
    }
}

impl Engine for PxcEngine {
    fn name(&self) -> &str {
        "pxc"
    }

    fn version(&self) -> &str {
        &self.config.operator_version
    }

    fn cluster_kind(&self) -> &ResourceKind {
        self.codec.kind()
    }

    fn backup_kind(&self) -> &ResourceKind {
        &self.backup_kind
    }

    fn restore_kind(&self) -> &ResourceKind {
        &self.restore_kind
    }

    fn controller(&self) -> &ControllerRef {
        &self.controller
    }

    fn bundle(&self) -> &[String] {
        &self.bundle
    }

    fn options(&self) -> &OptionIndex {
        self.codec.index()
    }

    fn create_manifest(&self, name: &str, overrides: &str) -> Result<String> {
        self.codec.create(name, &[&self.image_overrides(), overrides])
    }

    fn edit_manifest(&self, current: &[u8], overrides: &str) -> Result<String> {
        self.codec.edit(current, &[overrides])
    }

    fn upgrade_overrides(&self, version: &str) -> Result<String> {
        ensure_plain_value("pxc version", version)?;
        Ok(format!("pxc.image=percona/percona-xtradb-cluster:{}", version))
    }

    fn backup_manifest(&self, cluster: &str, backup: &str, storage: &str) -> Result<String> {
        let request = PxcBackupRequest {
            pxc_cluster: cluster.to_string(),
            storage_name: storage.to_string(),
        };
        Manifest::new(&self.backup_kind, backup, request).render()
    }

    fn restore_manifest(&self, cluster: &str, restore: &str, backup: &str) -> Result<String> {
        let request = PxcRestoreRequest {
            pxc_cluster: cluster.to_string(),
            backup_name: backup.to_string(),
        };
        Manifest::new(&self.restore_kind, restore, request).render()
    }

    fn cluster_classifier(&self) -> StatusClassifierRef {
        Arc::clone(&self.cluster_classifier)
    }

    fn job_classifier(&self) -> StatusClassifierRef {
        Arc::clone(&self.job_classifier)
    }
}

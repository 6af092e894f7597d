//! Percona Server for MongoDB engine

use super::codec::ModelCodec;
use super::status::{ClusterStatusClassifier, JobStatusClassifier};
use super::{ensure_plain_value, render_bundle, ControllerRef, Engine};
use crate::domain::ports::{ManifestRenderer, ResourceKind, StatusClassifierRef};
use crate::error::Result;
use crate::model::psmdb::{
    PsmdbBackupRequest, PsmdbClusterSpec, PsmdbRestoreRequest, PSMDB_BACKUP_IMAGE, PSMDB_IMAGE,
};
use crate::model::Manifest;
use crate::options::OptionIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const GROUP: &str = "psmdb.percona.com";
const BUNDLE: &str = include_str!("../../bundles/psmdb-operator.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PsmdbConfig {
    pub operator_version: String,
    pub operator_image: String,
    pub mongod_image: String,
    pub backup_image: String,
}

impl Default for PsmdbConfig {
    fn default() -> Self {
        Self {
            operator_version: "1.5.0".to_string(),
            operator_image: "percona/percona-server-mongodb-operator:1.5.0".to_string(),
            mongod_image: PSMDB_IMAGE.to_string(),
            backup_image: PSMDB_BACKUP_IMAGE.to_string(),
        }
    }
}

pub struct PsmdbEngine {
    config: PsmdbConfig,
    codec: ModelCodec<PsmdbClusterSpec>,
    backup_kind: ResourceKind,
    restore_kind: ResourceKind,
    controller: ControllerRef,
    bundle: Vec<String>,
    cluster_classifier: StatusClassifierRef,
    job_classifier: StatusClassifierRef,
}

impl PsmdbEngine {
    /// Engine whose operator runs in `namespace`
    pub fn new(config: PsmdbConfig, namespace: &str) -> Result<Self> {
        ensure_plain_value("mongod image", &config.mongod_image)?;
        ensure_plain_value("backup image", &config.backup_image)?;

        let cluster_kind = ResourceKind::new(GROUP, "v1", "PerconaServerMongoDB", "perconaservermongodbs");
        let bundle = render_bundle(BUNDLE, &config.operator_image, namespace)?;

        Ok(Self {
            codec: ModelCodec::new(cluster_kind)?,
            backup_kind: ResourceKind::new(
                GROUP,
                "v1",
                "PerconaServerMongoDBBackup",
                "perconaservermongodbbackups",
            ),
            restore_kind: ResourceKind::new(
                GROUP,
                "v1",
                "PerconaServerMongoDBRestore",
                "perconaservermongodbrestores",
            ),
            controller: ControllerRef {
                label_selector: "name=percona-server-mongodb-operator".to_string(),
                cluster_controller: "psmdb-controller".to_string(),
                backup_controller: "psmdbbackup-controller".to_string(),
                restore_controller: "psmdbrestore-controller".to_string(),
            },
            bundle,
            cluster_classifier: Arc::new(ClusterStatusClassifier {
                port: 27017,
                user: "userAdmin",
                secret_pointer: "/spec/secrets/users",
                components: &["replsets"],
            }),
            job_classifier: Arc::new(JobStatusClassifier {
                ready_states: &["ready"],
                error_states: &["error", "rejected"],
            }),
            config,
        })
    }

    fn image_overrides(&self) -> String {
        format!(
            "image={},backup.image={}",
            self.config.mongod_image, self.config.backup_image
        )
    }
}

impl Engine for PsmdbEngine {
    fn name(&self) -> &str {
        "psmdb"
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
        ensure_plain_value("psmdb version", version)?;
        Ok(format!("image=percona/percona-server-mongodb:{}", version))
    }

    fn backup_manifest(&self, cluster: &str, backup: &str, storage: &str) -> Result<String> {
        let request = PsmdbBackupRequest {
            psmdb_cluster: cluster.to_string(),
            storage_name: storage.to_string(),
        };
        Manifest::new(&self.backup_kind, backup, request).render()
    }

    fn restore_manifest(&self, cluster: &str, restore: &str, backup: &str) -> Result<String> {
        let request = PsmdbRestoreRequest {
            cluster_name: cluster.to_string(),
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

//! Percona XtraDB Cluster model
//!
//! Desired state of a `PerconaXtraDBCluster` custom resource plus the
//! backup and restore objects that target it.

use super::common::{
    BackupStorageSpec, PodAffinity, PodDisruptionBudgetSpec, PodResources, Toleration, VolumeSpec,
};
use super::ConfigModel;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PXC_IMAGE: &str = "percona/percona-xtradb-cluster:8.0.19-10.1";
pub const PROXYSQL_IMAGE: &str = "percona/percona-xtradb-cluster-operator:1.5.0-proxysql";
pub const BACKUP_IMAGE: &str = "percona/percona-xtradb-cluster-operator:1.5.0-pxc8.0-backup";

// =============================================================================
// Cluster Spec
// =============================================================================

/// `spec` of a PerconaXtraDBCluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PxcClusterSpec {
    pub secrets_name: String,
    pub allow_unsafe_configurations: bool,
    pub pxc: PxcPodSpec,
    pub proxysql: PxcPodSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PxcBackupSpec>,
}

/// Pod group settings shared by the PXC and ProxySQL sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PxcPodSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub size: i32,
    pub image: String,
    pub resources: PodResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<PodAffinity>,
    pub volume_spec: VolumeSpec,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PxcBackupSpec {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<BackupSchedule>,
    pub storages: BTreeMap<String, BackupStorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSchedule {
    pub name: String,
    pub schedule: String,
    pub keep: i32,
    pub storage_name: String,
}

impl ConfigModel for PxcClusterSpec {
    fn defaults(name: &str) -> Self {
        let mut storages = BTreeMap::new();
        storages.insert(
            "fs-pvc".to_string(),
            BackupStorageSpec {
                storage_type: "filesystem".to_string(),
                s3: None,
                volume: Some(VolumeSpec::pvc("6Gi")),
            },
        );

        Self {
            secrets_name: format!("{}-secrets", name),
            allow_unsafe_configurations: false,
            pxc: PxcPodSpec {
                enabled: None,
                size: 3,
                image: PXC_IMAGE.to_string(),
                resources: PodResources::requests("1G", "600m"),
                affinity: Some(PodAffinity::per_host()),
                volume_spec: VolumeSpec::pvc("6Gi"),
                pod_disruption_budget: Some(PodDisruptionBudgetSpec {
                    max_unavailable: Some(1),
                    min_available: None,
                }),
                grace_period: Some(600),
                ..Default::default()
            },
            proxysql: PxcPodSpec {
                enabled: Some(true),
                size: 3,
                image: PROXYSQL_IMAGE.to_string(),
                resources: PodResources::requests("1G", "600m"),
                affinity: Some(PodAffinity::per_host()),
                volume_spec: VolumeSpec::pvc("2Gi"),
                pod_disruption_budget: Some(PodDisruptionBudgetSpec {
                    max_unavailable: Some(1),
                    min_available: None,
                }),
                grace_period: Some(30),
                ..Default::default()
            },
            backup: Some(PxcBackupSpec {
                image: BACKUP_IMAGE.to_string(),
                service_account_name: Some("percona-xtradb-cluster-operator".to_string()),
                schedule: Vec::new(),
                storages,
            }),
        }
    }

    fn summary(&self) -> String {
        format!("pxc.size={}, proxysql.size={}", self.pxc.size, self.proxysql.size)
    }
}

// =============================================================================
// Backup / Restore Specs
// =============================================================================

/// `spec` of a PerconaXtraDBClusterBackup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PxcBackupRequest {
    pub pxc_cluster: String,
    pub storage_name: String,
}

/// `spec` of a PerconaXtraDBClusterRestore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PxcRestoreRequest {
    pub pxc_cluster: String,
    pub backup_name: String,
}

//! Percona Server for MongoDB model
//!
//! Replica sets are a sequence, so an option such as `replsets.size=5`
//! addresses every replica set at once.

use super::common::{BackupStorageSpec, PodAffinity, PodDisruptionBudgetSpec, PodResources, VolumeSpec};
use super::ConfigModel;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PSMDB_IMAGE: &str = "percona/percona-server-mongodb:4.2.8-8";
pub const PSMDB_BACKUP_IMAGE: &str = "percona/percona-server-mongodb-operator:1.5.0-backup";

/// `spec` of a PerconaServerMongoDB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PsmdbClusterSpec {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    pub allow_unsafe_configurations: bool,
    pub secrets: PsmdbSecrets,
    pub replsets: Vec<ReplsetSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PsmdbBackupSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PsmdbSecrets {
    pub users: String,
}

/// One MongoDB replica set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplsetSpec {
    pub name: String,
    pub size: i32,
    pub resources: PodResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<PodAffinity>,
    pub volume_spec: VolumeSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose: Option<Expose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arbiter: Option<Arbiter>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Expose {
    pub enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expose_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Arbiter {
    pub enabled: bool,
    pub size: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PsmdbBackupSpec {
    pub enabled: bool,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    pub storages: BTreeMap<String, BackupStorageSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<BackupTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupTask {
    pub name: String,
    pub enabled: bool,
    pub schedule: String,
    pub storage_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_type: Option<String>,
}

impl ConfigModel for PsmdbClusterSpec {
    fn defaults(name: &str) -> Self {
        Self {
            image: PSMDB_IMAGE.to_string(),
            image_pull_policy: Some("Always".to_string()),
            allow_unsafe_configurations: false,
            secrets: PsmdbSecrets {
                users: format!("{}-psmdb-users-secrets", name),
            },
            replsets: vec![ReplsetSpec {
                name: "rs0".to_string(),
                size: 3,
                resources: PodResources::requests("0.5G", "300m"),
                affinity: Some(PodAffinity::per_host()),
                volume_spec: VolumeSpec::pvc("3Gi"),
                pod_disruption_budget: Some(PodDisruptionBudgetSpec {
                    max_unavailable: Some(1),
                    min_available: None,
                }),
                expose: Some(Expose {
                    enabled: false,
                    expose_type: "LoadBalancer".to_string(),
                }),
                arbiter: Some(Arbiter {
                    enabled: false,
                    size: 1,
                }),
                node_selector: BTreeMap::new(),
            }],
            backup: Some(PsmdbBackupSpec {
                enabled: true,
                image: PSMDB_BACKUP_IMAGE.to_string(),
                service_account_name: Some("percona-server-mongodb-operator".to_string()),
                storages: BTreeMap::new(),
                tasks: Vec::new(),
            }),
        }
    }

    fn summary(&self) -> String {
        let sizes: Vec<String> = self
            .replsets
            .iter()
            .map(|rs| format!("{}={}", rs.name, rs.size))
            .collect();
        format!("replsets: {}", sizes.join(", "))
    }
}

/// `spec` of a PerconaServerMongoDBBackup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsmdbBackupRequest {
    pub psmdb_cluster: String,
    pub storage_name: String,
}

/// `spec` of a PerconaServerMongoDBRestore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsmdbRestoreRequest {
    pub cluster_name: String,
    pub backup_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{apply, OptionIndex};

    #[test]
    fn test_replset_options_broadcast() {
        let index = OptionIndex::build::<PsmdbClusterSpec>().unwrap();
        let mut spec = PsmdbClusterSpec::defaults("mongo1");
        spec.replsets.push(ReplsetSpec {
            name: "rs1".into(),
            size: 3,
            ..Default::default()
        });

        apply(&mut spec, &index, "replsets.size=5,replsets.arbiter.enabled=true").unwrap();

        assert_eq!(spec.replsets.len(), 2);
        assert!(spec.replsets.iter().all(|rs| rs.size == 5));
        assert!(spec.replsets.iter().all(|rs| rs.arbiter.as_ref().unwrap().enabled));
        assert_eq!(spec.replsets[0].name, "rs0");
    }

    #[test]
    fn test_summary() {
        let spec = PsmdbClusterSpec::defaults("mongo1");
        assert_eq!(spec.summary(), "replsets: rs0=3");
        assert_eq!(spec.secrets.users, "mongo1-psmdb-users-secrets");
    }
}

//! Operations a reconciliation run can carry out

use serde::{Deserialize, Serialize};

/// Create a new cluster from defaults plus overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpec {
    pub name: String,
    #[serde(default)]
    pub options: String,
}

/// Overlay overrides onto an existing cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSpec {
    pub name: String,
    #[serde(default)]
    pub options: String,
}

/// Move an existing cluster to another database version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSpec {
    pub name: String,
}

/// Take a backup of an existing cluster into a named storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    pub cluster: String,
    pub backup_name: String,
    pub storage: String,
}

/// Restore an existing cluster from a finished backup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    pub cluster: String,
    pub restore_name: String,
    pub backup_name: String,
}

/// Work handed to the reconciliation driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create(CreateSpec),
    Edit(EditSpec),
    Upgrade(UpgradeSpec),
    Delete(DeleteSpec),
    Backup(BackupSpec),
    Restore(RestoreSpec),
}

impl Operation {
    /// Short verb used in logs and metrics
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Create(_) => "create",
            Operation::Edit(_) => "edit",
            Operation::Upgrade(_) => "upgrade",
            Operation::Delete(_) => "delete",
            Operation::Backup(_) => "backup",
            Operation::Restore(_) => "restore",
        }
    }

    /// Name of the object the run waits on
    pub fn target(&self) -> &str {
        match self {
            Operation::Create(spec) => &spec.name,
            Operation::Edit(spec) => &spec.name,
            Operation::Upgrade(spec) => &spec.name,
            Operation::Delete(spec) => &spec.name,
            Operation::Backup(spec) => &spec.backup_name,
            Operation::Restore(spec) => &spec.restore_name,
        }
    }
}

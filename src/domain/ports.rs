//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the reconciliation core and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Resource Kinds
// =============================================================================

/// Fully qualified custom resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceKind {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

// =============================================================================
// Reconciliation States
// =============================================================================

/// Phase of a single reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconciliationState {
    Init,
    Polling,
    Ready,
    Error,
    TimedOut,
}

impl ReconciliationState {
    /// Whether the run ends in this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Ready | ReconciliationState::Error | ReconciliationState::TimedOut
        )
    }
}

impl std::fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationState::Init => write!(f, "init"),
            ReconciliationState::Polling => write!(f, "polling"),
            ReconciliationState::Ready => write!(f, "ready"),
            ReconciliationState::Error => write!(f, "error"),
            ReconciliationState::TimedOut => write!(f, "timedOut"),
        }
    }
}

/// Result of classifying a status document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: ReconciliationState,
    pub messages: Vec<String>,
}

impl Classification {
    pub fn init() -> Self {
        Self {
            state: ReconciliationState::Init,
            messages: Vec::new(),
        }
    }

    pub fn ready(messages: Vec<String>) -> Self {
        Self {
            state: ReconciliationState::Ready,
            messages,
        }
    }

    pub fn error(messages: Vec<String>) -> Self {
        Self {
            state: ReconciliationState::Error,
            messages,
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticLevel::Debug => write!(f, "debug"),
            DiagnosticLevel::Error => write!(f, "error"),
        }
    }
}

/// Message mined from the controller log while a run is polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Control Plane Port
// =============================================================================

/// Port for the orchestration platform hosting the clusters
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Apply one or more manifest documents
    async fn apply(&self, manifest: &str) -> Result<()>;

    /// Fetch an object as JSON, `None` when it does not exist
    async fn get(&self, kind: &ResourceKind, name: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an object
    async fn delete(&self, kind: &ResourceKind, name: &str) -> Result<()>;

    /// Full log of every controller pod matching the label selector
    async fn logs(&self, controller_label: &str) -> Result<Vec<u8>>;
}

// =============================================================================
// Manifest / Status Ports
// =============================================================================

/// Turns a populated model into the document the control plane understands
pub trait ManifestRenderer {
    fn render(&self) -> Result<String>;
}

/// Engine-specific interpretation of an object's status
pub trait StatusClassifier: Send + Sync {
    fn classify(&self, status: &[u8]) -> Result<Classification>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControlPlaneClientRef = Arc<dyn ControlPlaneClient>;
pub type StatusClassifierRef = Arc<dyn StatusClassifier>;

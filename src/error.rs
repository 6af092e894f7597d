//! Error types for the DBaaS provisioner
//!
//! Provides structured error types for the option overlay engine, the
//! control plane client and the reconciliation driver.

use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Option Overlay Errors
    // =========================================================================
    #[error("invalid option {key}")]
    UnknownOption { key: String },

    #[error("ambiguous option key {key}: declared by both {first} and {second}")]
    AmbiguousOptionKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("invalid value {value:?} for option {key}: {reason}")]
    TypeCoercion {
        key: String,
        value: String,
        reason: String,
    },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("Unknown database engine: {engine}")]
    UnknownEngine { engine: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    #[error("Timed out after {ticks} status checks waiting for {kind}/{name}")]
    ReconciliationTimedOut {
        kind: String,
        name: String,
        ticks: u32,
    },

    #[error("{kind}/{name} failed: {}", .messages.join("; "))]
    ReconciliationError {
        kind: String,
        name: String,
        messages: Vec<String>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a prerequisite bundle object may ignore this error.
    ///
    /// Prerequisite objects are shared by every cluster in a namespace, so a
    /// conflict with an existing object or a missing cluster-wide permission
    /// means somebody else already installed them.
    pub fn is_tolerated_for_prerequisite(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(response)) => {
                response.code == 409
                    || response.code == 403
                    || response.reason == "AlreadyExists"
                    || response.reason == "Forbidden"
            }
            Error::AlreadyExists { .. } => true,
            _ => false,
        }
    }

    /// Whether this error came from talking to the control plane
    pub fn is_control_plane_io(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::ControlPlane(_))
    }

    /// Whether the error is a user input problem in an override string
    pub fn is_option_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownOption { .. } | Error::TypeCoercion { .. }
        )
    }

    /// Operator-facing suggestion for recovering from this error
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::AlreadyExists { kind, .. } => Some(format!(
                "use `kubectl get {}` to list existing resources and pick another name",
                kind.to_lowercase()
            )),
            Error::NotFound { kind, .. } => Some(format!(
                "use `kubectl get {}` to list existing resources",
                kind.to_lowercase()
            )),
            Error::ReconciliationTimedOut { kind, name, .. } => Some(format!(
                "the operation may still complete; check manually with `kubectl describe {} {}`",
                kind.to_lowercase(),
                name
            )),
            Error::UnknownOption { .. } => {
                Some("run `dbaas options <engine>` to list the supported keys".to_string())
            }
            _ => None,
        }
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

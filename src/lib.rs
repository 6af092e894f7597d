//! DBaaS Provisioner
//!
//! Provisions and manages Percona database clusters on Kubernetes, either
//! from the `dbaas` command line or through an HTTP service broker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │         dbaas CLI            │   │        HTTP Broker           │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                └─────────────────┬────────────────┘
//!                                  │ Operation
//!                     ┌────────────┴────────────┐
//!                     │  Reconciliation Driver  │◄─── Log Tail Filter
//!                     └──┬───────────────────┬──┘
//!                        │                   │
//!          ┌─────────────┴─────┐   ┌─────────┴──────────────┐
//!          │ Engine (pxc/psmdb)│   │ Control Plane (kube)   │
//!          │ option overlay,   │   │ apply / get / delete / │
//!          │ status classifier │   │ logs                   │
//!          └───────────────────┘   └────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`options`]: Option index and override assignment
//! - [`model`]: Typed cluster configuration models
//! - [`engine`]: Database engines and their registry
//! - [`reconcile`]: Reconciliation driver and log tail filter
//! - [`controlplane`]: Kubernetes control plane adapter
//! - [`broker`]: HTTP service broker
//! - [`metrics`]: Prometheus metrics for reconciliation runs
//! - [`config`]: Provisioner configuration and options files
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod broker;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod options;
pub mod reconcile;

// Re-export commonly used types
pub use broker::{BrokerConfig, BrokerRouter, BrokerServer};

pub use config::{read_options_file, ProvisionerConfig};

pub use controlplane::{ControlPlaneConfig, KubeControlPlane};

pub use domain::ports::{
    Classification, ControlPlaneClient, ControlPlaneClientRef, Diagnostic, DiagnosticLevel,
    ManifestRenderer, ReconciliationState, ResourceKind, StatusClassifier, StatusClassifierRef,
};

pub use engine::{Engine, EngineRef, EngineRegistry, PsmdbConfig, PxcConfig};

pub use error::{Error, Result};

pub use metrics::Metrics;

pub use model::{ConfigModel, PsmdbClusterSpec, PxcClusterSpec};

pub use options::{apply, OptionIndex};

pub use reconcile::{
    LogCursor, LogTailFilter, Operation, ReadyReport, ReconcileHandle, ReconciliationDriver,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

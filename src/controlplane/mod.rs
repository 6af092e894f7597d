//! Control Plane Module
//!
//! Adapters that implement the [`ControlPlaneClient`](crate::domain::ports::ControlPlaneClient)
//! port against a real orchestration platform.

pub mod kubernetes;

pub use kubernetes::{ControlPlaneConfig, KubeControlPlane};

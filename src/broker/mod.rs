//! Service Broker
//!
//! HTTP front end that turns requests into reconciliation runs and keeps
//! their progress for polling.

pub mod operations;
pub mod rest;
pub mod server;

pub use operations::{OperationRecord, OperationTable};
pub use rest::BrokerRouter;
pub use server::{BrokerConfig, BrokerServer};

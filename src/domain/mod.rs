//! Domain types shared by the driver, the engines and the control plane
//!
//! [`ports`] holds the seams: the control plane client the driver talks to,
//! the status classifiers engines hand out and the run states they report.

pub mod ports;

pub use ports::*;

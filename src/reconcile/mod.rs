//! Reconciliation
//!
//! Drives one operation to a terminal state and mines the controller log for
//! progress diagnostics while it waits.

pub mod driver;
pub mod logtail;
pub mod operation;
pub mod sink;

pub use driver::{ReconciliationDriver, MAX_TICKS, TICK, WARMUP};
pub use logtail::{LogCursor, LogTailFilter};
pub use operation::{
    BackupSpec, CreateSpec, DeleteSpec, EditSpec, Operation, RestoreSpec, UpgradeSpec,
};
pub use sink::{Outcome, ReadyReport, ReconcileHandle, ResultSink};

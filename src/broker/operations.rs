//! Operation Table
//!
//! Broker requests return as soon as a run is spawned. A background task
//! drains each run's handle into this table so clients can poll it.

use crate::domain::ports::{Diagnostic, ReconciliationState};
use crate::error::Error;
use crate::reconcile::{Outcome, ReconcileHandle};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long finished records stay available for polling
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Progress of one broker operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub operation: String,
    pub engine: String,
    pub target: String,
    /// `init` while the run is in flight
    pub state: ReconciliationState,
    pub diagnostics: Vec<Diagnostic>,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct OperationTable {
    records: DashMap<String, OperationRecord>,
    next_id: AtomicU64,
    retention: Duration,
}

impl OperationTable {
    pub fn new() -> Arc<Self> {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Table that forgets finished records once they are older than `retention`
    pub fn with_retention(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(0),
            retention,
        })
    }

    /// Register a run and follow it until it ends. Returns the operation id.
    pub fn track(
        self: &Arc<Self>,
        operation: &str,
        engine: &str,
        target: &str,
        handle: ReconcileHandle,
    ) -> String {
        self.evict_expired();
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let id = format!("op-{}-{}", started_at.timestamp_millis(), seq);
        self.records.insert(
            id.clone(),
            OperationRecord {
                id: id.clone(),
                operation: operation.to_string(),
                engine: engine.to_string(),
                target: target.to_string(),
                state: ReconciliationState::Init,
                diagnostics: Vec::new(),
                messages: Vec::new(),
                error: None,
                hint: None,
                started_at,
                finished_at: None,
            },
        );

        let table = Arc::clone(self);
        let key = id.clone();
        tokio::spawn(async move {
            let outcome = handle
                .wait(|diagnostic| table.push_diagnostic(&key, diagnostic))
                .await;
            table.complete(&key, outcome);
        });
        id
    }

    pub fn get(&self, id: &str) -> Option<OperationRecord> {
        self.evict_expired();
        self.records.get(id).map(|record| record.clone())
    }

    fn evict_expired(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        if let Some(cutoff) = Utc::now().checked_sub_signed(retention) {
            self.evict_finished_before(cutoff);
        }
    }

    /// Drop records that finished before `cutoff`. Runs in flight are kept.
    fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.finished_at.map_or(true, |finished| finished >= cutoff));
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            debug!("Evicted {} finished operations", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push_diagnostic(&self, id: &str, diagnostic: Diagnostic) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.diagnostics.push(diagnostic);
        }
    }

    fn complete(&self, id: &str, outcome: Outcome) {
        let Some(mut record) = self.records.get_mut(id) else {
            return;
        };
        match outcome {
            Ok(report) => {
                record.state = ReconciliationState::Ready;
                record.messages = report.messages;
            }
            Err(e) => {
                record.state = match &e {
                    Error::ReconciliationTimedOut { .. } => ReconciliationState::TimedOut,
                    _ => ReconciliationState::Error,
                };
                if let Error::ReconciliationError { messages, .. } = &e {
                    record.messages = messages.clone();
                }
                record.hint = e.hint();
                record.error = Some(e.to_string());
            }
        }
        record.finished_at = Some(Utc::now());
        debug!("Operation {} finished as {}", id, record.state);
    }
}

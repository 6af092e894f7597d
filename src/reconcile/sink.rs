//! Result delivery for a reconciliation run
//!
//! A run reports through two single-reader channels: a stream of
//! diagnostics and a one-shot terminal outcome. The sink is consumed when the
//! outcome is sent, so nothing can follow it.

use crate::domain::ports::Diagnostic;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Successful end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyReport {
    pub kind: String,
    pub name: String,
    pub messages: Vec<String>,
}

/// Terminal outcome of a run
pub type Outcome = Result<ReadyReport>;

/// Sending half, owned by the running task
#[derive(Debug)]
pub struct ResultSink {
    diagnostics: mpsc::UnboundedSender<Diagnostic>,
    terminal: oneshot::Sender<Outcome>,
}

/// Receiving half, owned by the caller
#[derive(Debug)]
pub struct ReconcileHandle {
    diagnostics: mpsc::UnboundedReceiver<Diagnostic>,
    terminal: oneshot::Receiver<Outcome>,
}

impl ResultSink {
    /// Create a connected sink and handle
    pub fn channel() -> (ResultSink, ReconcileHandle) {
        let (diag_tx, diag_rx) = mpsc::unbounded_channel();
        let (terminal_tx, terminal_rx) = oneshot::channel();
        (
            ResultSink {
                diagnostics: diag_tx,
                terminal: terminal_tx,
            },
            ReconcileHandle {
                diagnostics: diag_rx,
                terminal: terminal_rx,
            },
        )
    }

    /// Forward a diagnostic. A caller that stopped listening is not an error.
    pub fn diagnostic(&self, diagnostic: Diagnostic) {
        let _ = self.diagnostics.send(diagnostic);
    }

    /// Deliver the terminal outcome and close both channels
    pub fn finish(self, outcome: Outcome) {
        let ResultSink {
            diagnostics,
            terminal,
        } = self;
        drop(diagnostics);
        let _ = terminal.send(outcome);
    }
}

impl ReconcileHandle {
    /// Next diagnostic, `None` once the run has finished
    pub async fn next_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostics.recv().await
    }

    /// Drain diagnostics into `on_diagnostic`, then return the outcome
    pub async fn wait<F>(mut self, mut on_diagnostic: F) -> Outcome
    where
        F: FnMut(Diagnostic),
    {
        while let Some(diagnostic) = self.diagnostics.recv().await {
            on_diagnostic(diagnostic);
        }
        self.terminal.await.unwrap_or_else(|_| {
            Err(Error::Internal(
                "reconciliation task ended without a result".to_string(),
            ))
        })
    }
}

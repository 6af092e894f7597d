//! Status classifiers
//!
//! Operators report progress in `status.state`. Clusters settle in `ready` or
//! `error`; backup and restore jobs use their own vocabulary, so the job
//! classifier is configured with the states that end a run.

use crate::domain::ports::{Classification, StatusClassifier};
use crate::error::Result;
use serde_json::Value;

fn state_of(object: &Value) -> &str {
    object
        .pointer("/status/state")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn non_empty_str<'a>(object: &'a Value, pointer: &str) -> Option<&'a str> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// =============================================================================
// Cluster Classifier
// =============================================================================

/// Classifies a database cluster object
#[derive(Debug, Clone)]
pub struct ClusterStatusClassifier {
    /// Client port of the database service
    pub port: u16,
    /// Administrative user the credentials secret holds
    pub user: &'static str,
    /// JSON pointer to the credentials secret name in the object
    pub secret_pointer: &'static str,
    /// Status sections that carry per-component messages
    pub components: &'static [&'static str],
}

impl ClusterStatusClassifier {
    fn ready_messages(&self, object: &Value) -> Vec<String> {
        let mut messages = Vec::new();
        if let Some(host) = non_empty_str(object, "/status/host") {
            messages.push(format!("Host: {}", host));
        }
        messages.push(format!("Port: {}", self.port));
        messages.push(format!("User: {}", self.user));
        if let Some(secret) = non_empty_str(object, self.secret_pointer) {
            messages.push(format!("Password secret: {}", secret));
        }
        messages
    }

    fn error_messages(&self, object: &Value) -> Vec<String> {
        let mut messages: Vec<String> = object
            .pointer("/status/message")
            .or_else(|| object.pointer("/status/messages"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        for component in self.components {
            let pointer = format!("/status/{}/message", component);
            if let Some(message) = non_empty_str(object, &pointer) {
                messages.push(format!("{}: {}", component, message));
            }
        }

        if let Some(conditions) = object.pointer("/status/conditions").and_then(Value::as_array) {
            for condition in conditions {
                let failed = condition
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.eq_ignore_ascii_case("error"));
                if let (true, Some(message)) = (failed, non_empty_str(condition, "/message")) {
                    messages.push(message.to_string());
                }
            }
        }

        if messages.is_empty() {
            messages.push("cluster reported an error state".to_string());
        }
        messages
    }
}

impl StatusClassifier for ClusterStatusClassifier {
    fn classify(&self, status: &[u8]) -> Result<Classification> {
        let object: Value = serde_json::from_slice(status)?;
        let state = state_of(&object);
        let classification = if state.eq_ignore_ascii_case("ready") {
            Classification::ready(self.ready_messages(&object))
        } else if state.eq_ignore_ascii_case("error") {
            Classification::error(self.error_messages(&object))
        } else {
            Classification::init()
        };
        Ok(classification)
    }
}

// =============================================================================
// Job Classifier
// =============================================================================

/// Classifies backup and restore objects
#[derive(Debug, Clone)]
pub struct JobStatusClassifier {
    pub ready_states: &'static [&'static str],
    pub error_states: &'static [&'static str],
}

impl JobStatusClassifier {
    fn matches(states: &[&str], state: &str) -> bool {
        states.iter().any(|s| s.eq_ignore_ascii_case(state))
    }
}

impl StatusClassifier for JobStatusClassifier {
    fn classify(&self, status: &[u8]) -> Result<Classification> {
        let object: Value = serde_json::from_slice(status)?;
        let state = state_of(&object);

        if Self::matches(self.ready_states, state) {
            let mut messages = Vec::new();
            if let Some(destination) = non_empty_str(&object, "/status/destination") {
                messages.push(format!("Destination: {}", destination));
            }
            if let Some(completed) = non_empty_str(&object, "/status/completed") {
                messages.push(format!("Completed: {}", completed));
            }
            return Ok(Classification::ready(messages));
        }

        if Self::matches(self.error_states, state) {
            let message = non_empty_str(&object, "/status/error")
                .or_else(|| non_empty_str(&object, "/status/comments"))
                .unwrap_or("job failed without a reason");
            return Ok(Classification::error(vec![message.to_string()]));
        }

        Ok(Classification::init())
    }
}

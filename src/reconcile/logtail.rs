//! Controller Log Tail Filter
//!
//! The controller log is re-read in full on every tick. The filter walks the
//! structured records, keeps a monotonic timestamp cursor so earlier records
//! are never reported twice, and isolates errors about one resource.

use crate::domain::ports::{Diagnostic, DiagnosticLevel};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Optimistic concurrency conflict the controller retries by itself
static STALE_VERSION_CONFLICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Operation cannot be fulfilled on (?P<target>[^:]+): the object has been modified; please apply your changes to the latest version and try again(?P<rest>.*)",
    )
    .expect("stale version pattern is valid")
});

// =============================================================================
// Cursor
// =============================================================================

/// Timestamp watermark, only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogCursor(DateTime<Utc>);

impl LogCursor {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(start)
    }

    /// Cursor that ignores everything logged before now
    pub fn starting_now() -> Self {
        Self(Utc::now())
    }

    pub fn position(&self) -> DateTime<Utc> {
        self.0
    }

    /// Move to `ts` if it is newer. Returns false when `ts` was already seen.
    pub fn advance(&mut self, ts: DateTime<Utc>) -> bool {
        if ts <= self.0 {
            return false;
        }
        self.0 = ts;
        true
    }
}

// =============================================================================
// Log Records
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogTimestamp {
    /// Seconds since the epoch (zap's default encoder)
    Seconds(f64),
    /// RFC 3339 text (ISO8601 encoder)
    Text(String),
}

impl LogTimestamp {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            LogTimestamp::Seconds(seconds) => {
                if !seconds.is_finite() {
                    return None;
                }
                let whole = seconds.floor();
                let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0);
                Utc.timestamp_opt(whole as i64, nanos as u32).single()
            }
            LogTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default)]
    level: String,
    ts: LogTimestamp,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    controller: String,
    /// `<namespace>/<name>`
    #[serde(default)]
    request: String,
    /// newer controller-runtime versions log the name separately
    #[serde(default)]
    name: String,
}

impl LogRecord {
    fn resource_name(&self) -> &str {
        match self.request.rsplit_once('/') {
            Some((_, name)) => name,
            None if !self.request.is_empty() => &self.request,
            None => &self.name,
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Picks the records relevant to one in-flight operation
#[derive(Debug, Clone)]
pub struct LogTailFilter {
    controller: String,
    resource_name: String,
}

impl LogTailFilter {
    pub fn new(controller: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            resource_name: resource_name.into(),
        }
    }

    /// Scan a full log read, returning diagnostics newer than `cursor`.
    ///
    /// The read may join several controller pods, so records are merged by
    /// timestamp before the cursor moves. Records with equal timestamps keep
    /// their log order.
    pub fn scan(&self, log: &[u8], cursor: &mut LogCursor) -> Vec<Diagnostic> {
        let text = String::from_utf8_lossy(log);
        let mut records: Vec<(DateTime<Utc>, LogRecord)> = text
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .filter_map(|line| serde_json::from_str::<LogRecord>(line).ok())
            .filter(|record| record.controller == self.controller)
            .filter_map(|record| record.ts.to_datetime().map(|ts| (ts, record)))
            .collect();
        records.sort_by_key(|(ts, _)| *ts);

        let mut diagnostics = Vec::new();
        for (ts, record) in records {
            // advance even for records that turn out to be irrelevant
            if !cursor.advance(ts) {
                continue;
            }
            if !record.level.eq_ignore_ascii_case("error") {
                continue;
            }
            if record.resource_name() != self.resource_name {
                continue;
            }
            diagnostics.push(classify(&record, ts));
        }

        diagnostics
    }
}

fn classify(record: &LogRecord, timestamp: DateTime<Utc>) -> Diagnostic {
    if let Some(captures) = STALE_VERSION_CONFLICT.captures(&record.error) {
        let rest = captures
            .name("rest")
            .map(|m| m.as_str().trim_start_matches(|c: char| c == ':' || c.is_whitespace()))
            .unwrap_or_default();
        let text = if rest.is_empty() {
            let target = captures.name("target").map(|m| m.as_str()).unwrap_or_default();
            format!("stale version of {}, retrying", target)
        } else {
            rest.to_string()
        };
        return Diagnostic {
            level: DiagnosticLevel::Debug,
            text,
            timestamp,
        };
    }

    let text = if record.error.is_empty() {
        record.msg.clone()
    } else {
        format!("{}: {}", record.msg, record.error)
    };
    Diagnostic {
        level: DiagnosticLevel::Error,
        text,
        timestamp,
    }
}

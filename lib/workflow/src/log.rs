//! Append-only execution log.
//!
//! Entries are ordered by a per-execution sequence number rather than by
//! wall-clock time, so concurrent nodes never tie. Every entry is also
//! mirrored as a `tracing` event.

use crate::node::NodeId;
use crate::store::ExecutionStore;
use autoflow_core::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses a persisted level name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [Self::Debug, Self::Info, Self::Warn, Self::Error]
            .into_iter()
            .find(|level| level.as_str() == value)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in an execution's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub execution_id: ExecutionId,
    /// Position within the execution's log, starting at 0.
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Sequenced log writer for one execution.
pub struct ExecutionLogSink {
    execution_id: ExecutionId,
    store: Arc<dyn ExecutionStore>,
    /// Entries in sequence order; the length is the next sequence number.
    entries: Mutex<Vec<LogEntry>>,
}

impl fmt::Debug for ExecutionLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLogSink")
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

impl ExecutionLogSink {
    #[must_use]
    pub fn new(execution_id: ExecutionId, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            execution_id,
            store,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends an entry and forwards it to the store.
    ///
    /// A store failure is reported through `tracing` and does not stop the
    /// run; the entry stays in the in-memory log.
    pub async fn append(
        &self,
        node_id: Option<&NodeId>,
        level: LogLevel,
        message: impl Into<String>,
        data: JsonValue,
    ) -> LogEntry {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = LogEntry {
                execution_id: self.execution_id,
                sequence: entries.len() as u64,
                node_id: node_id.cloned(),
                level,
                message: message.into(),
                data,
                created_at: Utc::now(),
            };
            entries.push(entry.clone());
            entry
        };

        mirror(&entry);

        if let Err(report) = self.store.append_log(entry.clone()).await {
            warn!(
                execution_id = %self.execution_id,
                sequence = entry.sequence,
                error = %report,
                "failed to persist execution log entry"
            );
        }
        entry
    }

    pub async fn info(&self, node_id: Option<&NodeId>, message: impl Into<String>) -> LogEntry {
        self.append(node_id, LogLevel::Info, message, JsonValue::Null)
            .await
    }

    pub async fn warn(&self, node_id: Option<&NodeId>, message: impl Into<String>) -> LogEntry {
        self.append(node_id, LogLevel::Warn, message, JsonValue::Null)
            .await
    }

    pub async fn error(
        &self,
        node_id: Option<&NodeId>,
        message: impl Into<String>,
        data: JsonValue,
    ) -> LogEntry {
        self.append(node_id, LogLevel::Error, message, data).await
    }

    /// Returns a copy of every entry in sequence order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn mirror(entry: &LogEntry) {
    let node_id = entry.node_id.as_ref().map_or("-", NodeId::as_str);
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Debug => {
            debug!(execution_id = %entry.execution_id, node_id, sequence = entry.sequence, "{message}");
        }
        LogLevel::Info => {
            info!(execution_id = %entry.execution_id, node_id, sequence = entry.sequence, "{message}");
        }
        LogLevel::Warn => {
            warn!(execution_id = %entry.execution_id, node_id, sequence = entry.sequence, "{message}");
        }
        LogLevel::Error => {
            error!(execution_id = %entry.execution_id, node_id, sequence = entry.sequence, "{message}");
        }
    }
}

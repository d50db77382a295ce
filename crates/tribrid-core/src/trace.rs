//! Structured per-request trace data model and sink contract.
//!
//! A trace brackets one request: `start` opens it (and reports whether
//! tracing is even enabled for this run), `add_event` appends structured
//! events, `end` closes it. `end` is idempotent — a second call is a
//! no-op — and any `add_event` arriving after `end` is discarded (the
//! concrete sink logs a warning via `tracing::warn!`, since silently
//! dropping an event without a trace of the drop would defeat the
//! purpose of tracing in the first place).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConfigSnapshot;
use crate::error::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: String,
    pub data: serde_json::Value,
    pub message: Option<String>,
    pub at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub run_id: String,
    pub corpus_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new(run_id: impl Into<String>, corpus_id: impl Into<String>, started_at_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            corpus_id: corpus_id.into(),
            started_at_ms,
            ended_at_ms: None,
            events: Vec::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at_ms.is_some()
    }
}

/// A trace sink backend (in-memory ring buffer, file-backed JSONL,
/// etc.). Implementations decide whether tracing is enabled (e.g. a
/// config flag, a sampling rate) and report that back from `start`.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Opens a trace for `run_id`. Returns `true` if events for this run
    /// will actually be recorded; callers can skip building event
    /// payloads entirely when this is `false`.
    async fn start(&self, run_id: &str, corpus_id: &str, started_at_ms: i64, config: &ConfigSnapshot) -> CoreResult<bool>;

    /// Appends an event. A no-op (not an error) if `run_id` was never
    /// started, was already ended, or tracing is disabled.
    async fn add_event(&self, run_id: &str, kind: &str, data: serde_json::Value, message: Option<String>) -> CoreResult<()>;

    /// Closes the trace. Idempotent: a second call for the same
    /// `run_id` is a no-op, not an error.
    async fn end(&self, run_id: &str, ended_at_ms: Option<i64>) -> CoreResult<()>;
}

/// Reference in-memory sink: every trace is always enabled and kept for
/// the lifetime of the process. Used for tests; the app crate's
/// file-backed sink follows the same bracketing contract.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use async_trait::async_trait;

    use super::{ConfigSnapshot, CoreResult, Trace, TraceEvent, TraceSink};

    pub struct InMemoryTraceSink {
        traces: RwLock<HashMap<String, Trace>>,
    }

    impl InMemoryTraceSink {
        pub fn new() -> Self {
            Self { traces: RwLock::new(HashMap::new()) }
        }

        pub fn get(&self, run_id: &str) -> Option<Trace> {
            self.traces.read().unwrap().get(run_id).cloned()
        }
    }

    impl Default for InMemoryTraceSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TraceSink for InMemoryTraceSink {
        async fn start(&self, run_id: &str, corpus_id: &str, started_at_ms: i64, _config: &ConfigSnapshot) -> CoreResult<bool> {
            self.traces.write().unwrap().insert(run_id.to_string(), Trace::new(run_id, corpus_id, started_at_ms));
            Ok(true)
        }

        async fn add_event(&self, run_id: &str, kind: &str, data: serde_json::Value, message: Option<String>) -> CoreResult<()> {
            let mut traces = self.traces.write().unwrap();
            if let Some(trace) = traces.get_mut(run_id) {
                if trace.is_ended() {
                    tracing::warn!(run_id, kind, "trace event discarded: trace already ended");
                    return Ok(());
                }
                trace.events.push(TraceEvent {
                    kind: kind.to_string(),
                    data,
                    message,
                    at_ms: trace.started_at_ms,
                });
            } else {
                tracing::warn!(run_id, kind, "trace event discarded: run was never started");
            }
            Ok(())
        }

        async fn end(&self, run_id: &str, ended_at_ms: Option<i64>) -> CoreResult<()> {
            let mut traces = self.traces.write().unwrap();
            if let Some(trace) = traces.get_mut(run_id) {
                if trace.is_ended() {
                    return Ok(());
                }
                trace.ended_at_ms = Some(ended_at_ms.unwrap_or(trace.started_at_ms));
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::ConfigSnapshot;

        #[tokio::test]
        async fn end_is_idempotent_and_blocks_further_events() {
            let sink = InMemoryTraceSink::new();
            let config = ConfigSnapshot::default();
            sink.start("r1", "c1", 0, &config).await.unwrap();
            sink.add_event("r1", "chat.request", serde_json::json!({}), None).await.unwrap();
            sink.end("r1", Some(10)).await.unwrap();
            sink.end("r1", Some(999)).await.unwrap();
            let trace = sink.get("r1").unwrap();
            assert_eq!(trace.ended_at_ms, Some(10));

            sink.add_event("r1", "chat.response", serde_json::json!({}), None).await.unwrap();
            let trace = sink.get("r1").unwrap();
            assert_eq!(trace.events.len(), 1);
        }

        #[tokio::test]
        async fn add_event_without_start_is_discarded_silently() {
            let sink = InMemoryTraceSink::new();
            sink.add_event("never-started", "x", serde_json::json!({}), None).await.unwrap();
            assert!(sink.get("never-started").is_none());
        }
    }
}

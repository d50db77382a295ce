//! File-backed JSONL trace sink.
//!
//! One file per `run_id` under [`crate::config::TraceConfig::dir`],
//! each line a JSON-encoded [`tribrid_core::trace::TraceEvent`] plus a
//! leading `trace.start`/trailing `trace.end` marker line. Matches the
//! bracketing contract in [`tribrid_core::trace::TraceSink`]: `end` is
//! idempotent, `add_event` after `end` is discarded with a warning.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use tribrid_core::config::ConfigSnapshot;
use tribrid_core::error::{CoreError, CoreResult};
use tribrid_core::trace::TraceSink;

pub struct FileTraceSink {
    dir: PathBuf,
    enabled: bool,
    ended: Mutex<HashSet<String>>,
}

impl FileTraceSink {
    pub fn new(dir: PathBuf, enabled: bool) -> Self {
        Self { dir, enabled, ended: Mutex::new(HashSet::new()) }
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    async fn append_line(&self, run_id: &str, line: &str) -> CoreResult<()> {
        let path = self.run_path(run_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("trace file open failed: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("trace file write failed: {e}")))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("trace file write failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl TraceSink for FileTraceSink {
    async fn start(&self, run_id: &str, corpus_id: &str, started_at_ms: i64, _config: &ConfigSnapshot) -> CoreResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("trace dir creation failed: {e}")))?;
        let line = serde_json::json!({
            "kind": "trace.start",
            "run_id": run_id,
            "corpus_id": corpus_id,
            "started_at_ms": started_at_ms,
        })
        .to_string();
        self.append_line(run_id, &line).await?;
        Ok(true)
    }

    async fn add_event(&self, run_id: &str, kind: &str, data: serde_json::Value, message: Option<String>) -> CoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.ended.lock().unwrap().contains(run_id) {
            tracing::warn!(run_id, kind, "trace event discarded: trace already ended");
            return Ok(());
        }
        let line = serde_json::json!({
            "kind": kind,
            "run_id": run_id,
            "data": data,
            "message": message,
        })
        .to_string();
        self.append_line(run_id, &line).await
    }

    async fn end(&self, run_id: &str, ended_at_ms: Option<i64>) -> CoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        {
            let mut ended = self.ended.lock().unwrap();
            if !ended.insert(run_id.to_string()) {
                return Ok(());
            }
        }
        let line = serde_json::json!({
            "kind": "trace.end",
            "run_id": run_id,
            "ended_at_ms": ended_at_ms,
        })
        .to_string();
        self.append_line(run_id, &line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_reports_false_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileTraceSink::new(dir.path().to_path_buf(), false);
        let config = ConfigSnapshot::default();
        let started = sink.start("r1", "c1", 0, &config).await.unwrap();
        assert!(!started);
        assert!(!dir.path().join("r1.jsonl").exists());
    }

    #[tokio::test]
    async fn end_is_idempotent_and_blocks_further_events() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileTraceSink::new(dir.path().to_path_buf(), true);
        let config = ConfigSnapshot::default();
        sink.start("r1", "c1", 0, &config).await.unwrap();
        sink.add_event("r1", "chat.request", serde_json::json!({}), None).await.unwrap();
        sink.end("r1", Some(10)).await.unwrap();
        sink.end("r1", Some(999)).await.unwrap();
        sink.add_event("r1", "chat.response", serde_json::json!({}), None).await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("r1.jsonl")).await.unwrap();
        let end_lines = content.lines().filter(|l| l.contains("trace.end")).count();
        assert_eq!(end_lines, 1);
        assert!(!content.contains("chat.response"));
    }
}

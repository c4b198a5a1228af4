use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use blueprint_core::event::EventBus;
use blueprint_core::types::{PipelineEvent, RunId};

/// JSONL run logger.
///
/// Writes one JSON object per pipeline event to
/// `{log_dir}/{run_id}/{timestamp}.jsonl`, flushing after every line so a
/// crashed run still leaves a readable log.
pub struct RunLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Subscribe to `events` now and log in a background task.
    ///
    /// The task ends on `RunCompleted`/`RunFailed`, on cancellation, or when
    /// the bus closes, and yields the log file path if one was opened.
    pub fn spawn(
        self,
        events: &Arc<EventBus>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<Option<PathBuf>> {
        let rx = events.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    pub async fn run(
        self,
        mut rx: Receiver<PipelineEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, path = %run_dir.display(), "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "Run log started");
        let mut writer = tokio::io::BufWriter::new(file);
        let rid = run_id.0.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Run logger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let entry = event_to_entry(&rid, &event);
                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }

                            if matches!(event, PipelineEvent::RunCompleted { .. } | PipelineEvent::RunFailed { .. }) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Run logger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event bus closed, run logger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "Run log finished");
        Some(log_path)
    }
}

fn event_to_entry(run_id: &str, event: &PipelineEvent) -> LogEntry {
    let (event_type, stage, detail) = match event {
        PipelineEvent::RunStarted { request, .. } => (
            "run_started",
            None,
            Some(serde_json::json!({ "request": truncate_str(request, 500) })),
        ),
        PipelineEvent::StageStarted { stage, step } => (
            "stage_started",
            Some(stage.to_string()),
            Some(serde_json::json!({ "step": step })),
        ),
        PipelineEvent::StageCompleted {
            stage,
            step,
            elapsed_ms,
        } => (
            "stage_completed",
            Some(stage.to_string()),
            Some(serde_json::json!({ "step": step, "elapsed_ms": elapsed_ms })),
        ),
        PipelineEvent::Routed { from, to } => (
            "routed",
            Some(from.to_string()),
            Some(serde_json::json!({ "to": to })),
        ),
        PipelineEvent::FileWritten { path, bytes } => (
            "file_written",
            None,
            Some(serde_json::json!({ "path": path, "bytes": bytes })),
        ),
        PipelineEvent::RunCompleted {
            total_steps,
            files_written,
            ..
        } => (
            "run_completed",
            None,
            Some(serde_json::json!({
                "total_steps": total_steps,
                "files_written": files_written,
            })),
        ),
        PipelineEvent::RunFailed { error, .. } => (
            "run_failed",
            None,
            Some(serde_json::json!({ "error": error })),
        ),
    };

    LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        run_id: run_id.to_string(),
        event_type,
        stage,
        detail,
    }
}

fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ChatPay — Audit Logging
//
// Append-only JSONL trail of workflow starts, submission attempts and
// outcomes per conversation. Never records credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Type of audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    WorkflowStarted {
        workflow: String,
    },
    SubmissionAttempted {
        workflow: String,
        endpoint: String,
    },
    WorkflowFinished {
        workflow: String,
        status: String,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A single entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub conversation: String,
    pub event: AuditEvent,
}

pub struct AuditLogger {
    path: PathBuf,
    writer: Arc<Mutex<()>>, // Used to serialize file access
}

impl AuditLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub async fn log(&self, conversation: &str, event: AuditEvent) -> anyhow::Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            conversation: conversation.to_string(),
            event,
        };

        let json = serde_json::to_string(&entry)? + "\n";

        let _guard = self.writer.lock().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.write_all(json.as_bytes())?;

        Ok(())
    }

    /// Like [`log`](Self::log), but failures are only reported through tracing.
    pub async fn record(&self, conversation: &str, event: AuditEvent) {
        if let Err(e) = self.log(conversation, event).await {
            tracing::warn!(path = %self.path.display(), "Failed to write audit entry: {}", e);
        }
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Read all audit entries from the log file.
    pub fn read_entries(&self) -> anyhow::Result<Vec<AuditEntry>> {
        let content = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_workflow_events() {
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::new(tmp.path().join("audit.jsonl"));

        logger
            .log(
                "telegram:1",
                AuditEvent::WorkflowStarted {
                    workflow: "email".into(),
                },
            )
            .await
            .unwrap();
        logger
            .log(
                "telegram:1",
                AuditEvent::WorkflowFinished {
                    workflow: "email".into(),
                    status: "cancelled".into(),
                    state: "CANCELLED".into(),
                    error: None,
                },
            )
            .await
            .unwrap();

        let entries = logger.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].conversation, "telegram:1");
        match &entries[1].event {
            AuditEvent::WorkflowFinished { status, error, .. } => {
                assert_eq!(status, "cancelled");
                assert!(error.is_none());
            }
            other => panic!("expected WorkflowFinished event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_only_multiple_entries() {
        let tmp = TempDir::new().unwrap();
        let logger = AuditLogger::new(tmp.path().join("audit.jsonl"));

        for i in 0..5 {
            logger
                .log(
                    &format!("console:{}", i),
                    AuditEvent::WorkflowStarted {
                        workflow: format!("workflow-{}", i),
                    },
                )
                .await
                .unwrap();
        }

        let entries = logger.read_entries().unwrap();
        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.conversation, format!("console:{}", i));
        }
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("nested").join("deep").join("audit.jsonl");
        let logger = AuditLogger::new(log_path.clone());

        logger
            .record(
                "console:1",
                AuditEvent::SubmissionAttempted {
                    workflow: "wallet".into(),
                    endpoint: "/transfers/wallet-withdraw".into(),
                },
            )
            .await;

        assert!(log_path.exists());
        assert_eq!(logger.get_path(), log_path.as_path());
    }

    #[tokio::test]
    async fn test_record_never_fails() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened for appending
        let logger = AuditLogger::new(tmp.path().to_path_buf());
        logger
            .record(
                "console:1",
                AuditEvent::WorkflowStarted {
                    workflow: "wallet".into(),
                },
            )
            .await;
    }
}

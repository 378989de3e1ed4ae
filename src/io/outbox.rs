//! Outbox channel - writes outbound messages to a file
//!
//! Messages are written in JSONL format (one JSON object per line) to the
//! file specified in config. Used for development and dry runs.

use crate::io::gateway::{DispatchError, MessagingChannel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct OutboxRecord<'a> {
    id: Uuid,
    ts: DateTime<Utc>,
    to: &'a str,
    body: &'a str,
}

pub struct OutboxChannel {
    file_path: String,
}

impl OutboxChannel {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "outbox_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append a line to the outbox file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "outbox_written");

        Ok(())
    }
}

#[async_trait]
impl MessagingChannel for OutboxChannel {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        let record = OutboxRecord { id: Uuid::now_v7(), ts: Utc::now(), to, body };
        let line =
            serde_json::to_string(&record).map_err(|e| DispatchError::Transport(e.to_string()))?;

        self.append_line(&line).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                DispatchError::PermissionDenied(format!("{}: {}", self.file_path, e))
            }
            _ => DispatchError::Unavailable(format!("{}: {}", self.file_path, e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appends_one_json_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("outbox.jsonl");
        let channel = OutboxChannel::new(path.to_str().unwrap());

        channel.send_text("+15551234", "... --- ...").await.unwrap();
        channel.send_text("+15551234", ". / -").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["to"], "+15551234");
        assert_eq!(first["body"], "... --- ...");
        assert!(first["id"].is_string());
    }

    #[tokio::test]
    async fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for append
        let channel = OutboxChannel::new(dir.path().to_str().unwrap());
        assert!(channel.send_text("+1", ".").await.is_err());
    }
}

// Audit trail for sandbox lifecycle events
// Structured records on a bounded queue; emission never blocks a worker

use crate::constants::sandbox::AUDIT_QUEUE_CAPACITY;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// One audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// When the event happened
    pub at: DateTime<Utc>,

    /// Event name, dotted ("sandbox.process_start")
    pub event: String,

    /// Correlation id of the process the event belongs to
    pub process_id: Option<String>,

    /// Free-form structured context
    pub details: Value,
}

struct AuditInner {
    queue: Mutex<VecDeque<AuditRecord>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Handle for emitting audit records
///
/// Records go onto a bounded in-memory queue; a background task appends them
/// as JSON lines to the audit file. When the queue is full the oldest record
/// is discarded and a drop counter incremented, so emission never blocks.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<AuditInner>,
}

impl AuditLog {
    /// Create an audit log writing JSONL under `log_dir/audit/`
    ///
    /// With `log_dir = None` records are queued and mirrored to the debug
    /// log but never written to disk (used by tests).
    ///
    /// Must be called inside a tokio runtime; the writer task is spawned
    /// here.
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        let inner = Arc::new(AuditInner {
            queue: Mutex::new(VecDeque::with_capacity(AUDIT_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: AUDIT_QUEUE_CAPACITY,
        });

        if let Some(dir) = log_dir {
            let writer_inner = Arc::clone(&inner);
            tokio::spawn(async move {
                writer_task(writer_inner, dir).await;
            });
        }

        Self { inner }
    }

    /// Emit one record; never blocks
    pub fn record(&self, event: &str, process_id: Option<&str>, details: Value) {
        let record = AuditRecord {
            at: Utc::now(),
            event: event.to_string(),
            process_id: process_id.map(|s| s.to_string()),
            details,
        };
        debug!("audit: {} ({:?})", record.event, record.process_id);

        let mut queue = match self.inner.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.len() == self.inner.capacity {
            queue.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(record);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Number of records discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Wait until the queue has been drained to disk
    ///
    /// Called once at shutdown. Gives up after a couple of seconds so a dead
    /// writer (unwritable log directory) cannot wedge the exit path.
    pub async fn flush(&self) {
        for _ in 0..100 {
            let empty = match self.inner.queue.lock() {
                Ok(q) => q.is_empty(),
                Err(poisoned) => poisoned.into_inner().is_empty(),
            };
            if empty {
                return;
            }
            self.inner.notify.notify_one();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Drain the queue into a timestamped JSONL file
async fn writer_task(inner: Arc<AuditInner>, log_dir: PathBuf) {
    let audit_dir = log_dir.join("audit");
    if let Err(e) = tokio::fs::create_dir_all(&audit_dir).await {
        warn!("cannot create audit directory {}: {}", audit_dir.display(), e);
        return;
    }

    let file_path = audit_dir.join(format!(
        "audit_{}.jsonl",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            warn!("cannot open audit log {}: {}", file_path.display(), e);
            return;
        }
    };

    loop {
        inner.notify.notified().await;

        loop {
            let record = {
                let mut queue = match inner.queue.lock() {
                    Ok(q) => q,
                    Err(poisoned) => poisoned.into_inner(),
                };
                queue.pop_front()
            };
            let Some(record) = record else { break };

            match serde_json::to_string(&record) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        warn!("audit write failed: {}", e);
                    }
                }
                Err(e) => warn!("audit serialization failed: {}", e),
            }
        }
        let _ = file.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_are_queued() {
        let audit = AuditLog::new(None);
        audit.record("sandbox.process_start", Some("p-1"), json!({"pid": 42}));
        audit.record("sandbox.process_end", Some("p-1"), json!({"exit_code": 0}));

        assert_eq!(audit.queued(), 2);
        assert_eq!(audit.dropped(), 0);
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_when_full() {
        let audit = AuditLog::new(None);
        for i in 0..(AUDIT_QUEUE_CAPACITY + 5) {
            audit.record("sandbox.tick", None, json!({ "i": i }));
        }

        assert_eq!(audit.queued(), AUDIT_QUEUE_CAPACITY);
        assert_eq!(audit.dropped(), 5);

        // The survivor at the head is the oldest kept record
        let head_i = {
            let q = audit.inner.queue.lock().unwrap();
            q.front().unwrap().details["i"].as_u64().unwrap()
        };
        assert_eq!(head_i, 5);
    }

    #[tokio::test]
    async fn test_writer_persists_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(Some(dir.path().to_path_buf()));
        audit.record("sandbox.process_start", Some("p-9"), json!({}));
        audit.flush().await;
        // Give the writer a beat to hit the filesystem
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let audit_dir = dir.path().join("audit");
        let entry = std::fs::read_dir(&audit_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(entry.path()).unwrap();
        assert!(contents.contains("sandbox.process_start"));
        assert!(contents.contains("p-9"));
    }
}

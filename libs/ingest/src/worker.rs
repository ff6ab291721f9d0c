use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use stream_api::{BackendError, Document, DocumentStore, ID_FIELD};

use crate::config::WorkerConfig;
use crate::error::IngestError;

// ═══════════════════════════════════════════════════════════════
//  Messages
// ═══════════════════════════════════════════════════════════════

/// Inbound mailbox message. One-way: there is no reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Decode `payload` and persist it.
    Parse { payload: String },
    /// Report the processed count.
    Status,
    /// Any other `kind`; logged and dropped.
    #[serde(other)]
    Unknown,
}

/// Counters owned by the worker.
///
/// `processed` counts parse requests attempted, not documents persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub persisted: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
}

// ═══════════════════════════════════════════════════════════════
//  WorkerHandle
// ═══════════════════════════════════════════════════════════════

/// Sending side of the worker mailbox. Sends are fire-and-forget and
/// never block, so the handle is usable from the blocking ingestion thread.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn tell(&self, message: WorkerMessage) -> Result<(), IngestError> {
        self.tx.send(message).map_err(|_| IngestError::WorkerGone)
    }

    pub fn parse(&self, payload: String) -> Result<(), IngestError> {
        self.tell(WorkerMessage::Parse { payload })
    }

    pub fn status(&self) -> Result<(), IngestError> {
        self.tell(WorkerMessage::Status)
    }
}

/// Unbounded mailbox: the handle plus the receiving end.
pub fn mailbox() -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkerHandle { tx }, rx)
}

// ═══════════════════════════════════════════════════════════════
//  Worker
// ═══════════════════════════════════════════════════════════════

/// Sequential parser/persister. Owns the store handle and its counters;
/// handles exactly one message at a time.
pub struct Worker {
    store: Arc<dyn DocumentStore>,
    config: WorkerConfig,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(store: Arc<dyn DocumentStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            config,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn processed(&self) -> u64 {
        self.stats.processed
    }

    /// Spawn the worker task on the current runtime.
    ///
    /// The task drains the mailbox until every handle is dropped, then
    /// resolves to the final counters.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<WorkerStats>) {
        let (handle, rx) = mailbox();
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerStats {
        tracing::info!("worker started");
        while let Some(message) = rx.recv().await {
            self.handle(message).await;
        }
        tracing::info!(
            processed = self.stats.processed,
            persisted = self.stats.persisted,
            decode_failures = self.stats.decode_failures,
            persist_failures = self.stats.persist_failures,
            "worker stopped"
        );
        self.stats
    }

    pub async fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Status => {
                tracing::info!(processed = self.stats.processed, "message count = {}", self.stats.processed);
            }
            WorkerMessage::Parse { payload } => self.parse(&payload).await,
            WorkerMessage::Unknown => {
                tracing::warn!("received unknown message");
            }
        }
    }

    async fn parse(&mut self, payload: &str) {
        match decode(payload) {
            Ok(document) => {
                let id = uuid::Uuid::new_v4().to_string();
                match self.persist(&id, document).await {
                    Ok(()) => self.stats.persisted += 1,
                    Err(e) => {
                        // dead letter
                        tracing::error!(id = %id, error = ?e, payload, "persist failed, dropping document");
                        self.stats.persist_failures += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, payload, "decode failed");
                self.stats.decode_failures += 1;
            }
        }
        self.stats.processed += 1;
    }

    /// upsert + flush, retried `persist_retries` extra times.
    async fn persist(&self, id: &str, mut document: Document) -> Result<(), BackendError> {
        document.insert(ID_FIELD.to_string(), serde_json::Value::String(id.to_string()));

        let mut attempt = 0;
        loop {
            let result = match self.store.upsert(id, document.clone()).await {
                Ok(()) => self.store.flush().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.persist_retries => {
                    attempt += 1;
                    tracing::warn!(id, attempt, error = ?e, "persist failed, retrying");
                    tokio::time::sleep(self.config.persist_backoff()).await;
                }
                Err(e) => return Err(e.with_context(format!("after {} attempts", attempt + 1))),
            }
        }
    }
}

/// Decode a payload into a JSON object document.
pub fn decode(payload: &str) -> Result<Document, BackendError> {
    match serde_json::from_str::<serde_json::Value>(payload)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(BackendError::format(format!(
            "expected JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

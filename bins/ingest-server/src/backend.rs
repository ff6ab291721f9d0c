use std::sync::Arc;

use store_file::{FileDocumentStore, FileStoreConfig};
use store_memory::MemoryDocumentStore;
use stream_api::{DocumentStore, StreamClient};
use stream_file::{FileConsumer, FileStreamConfig};

use crate::config::{IngestConfig, StoreBackend, StreamBackend};
use crate::error::ServerError;

// ════════════════════════════════════════════════════════════════
//  Backend selection
// ════════════════════════════════════════════════════════════════

/// Unsubscribed consumer for the `[stream]` backend.
pub fn open_stream(config: &IngestConfig) -> Result<Box<dyn StreamClient>, ServerError> {
    match config.stream.backend {
        StreamBackend::File => {
            let cfg: FileStreamConfig = config.stream.typed("stream")?;
            tracing::info!(backend = "file", data_dir = %cfg.data_dir, group = %cfg.group, "stream backend");
            Ok(Box::new(FileConsumer::new(cfg)))
        }
    }
}

pub async fn open_store(config: &IngestConfig) -> Result<Arc<dyn DocumentStore>, ServerError> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!(backend = "memory", "document store (not persisted across restarts)");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        StoreBackend::File => {
            let cfg: FileStoreConfig = config.store.typed("store")?;
            let store = FileDocumentStore::open(&cfg).await?;
            tracing::info!(backend = "file", path = %store.path().display(), "document store");
            Ok(Arc::new(store))
        }
    }
}

/// Data dir of the file stream; `produce` writes there directly.
pub fn stream_data_dir(config: &IngestConfig) -> Result<String, ServerError> {
    match config.stream.backend {
        StreamBackend::File => {
            let cfg: FileStreamConfig = config.stream.typed("stream")?;
            Ok(cfg.data_dir)
        }
    }
}

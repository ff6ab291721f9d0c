use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use stream_api::{BackendError, Document, DocumentStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryDocumentStore
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Documents {
    by_id: HashMap<String, Document>,
    /// Ids in first-insert order.
    order: Vec<String>,
}

/// In-memory document store. Nothing survives the process; `flush` only
/// counts calls.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<Documents>,
    upserts: AtomicU64,
    flushes: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.by_id.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<String> {
        self.docs.read().await.order.clone()
    }

    /// Documents in first-insert order.
    pub async fn documents(&self) -> Vec<Document> {
        let docs = self.docs.read().await;
        docs.order
            .iter()
            .filter_map(|id| docs.by_id.get(id).cloned())
            .collect()
    }

    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert(
        &self,
        id: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut docs = self.docs.write().await;
            if docs.by_id.insert(id.clone(), document).is_none() {
                docs.order.push(id);
            }
            self.upserts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

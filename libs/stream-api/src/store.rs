use std::future::Future;
use std::pin::Pin;

use crate::error::BackendError;
use crate::types::Document;

/// Document store the worker persists parsed records into.
pub trait DocumentStore: Send + Sync {
    /// Insert `document` under `id`, replacing any existing document.
    fn upsert(
        &self,
        id: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Make every write issued so far durable.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;
}

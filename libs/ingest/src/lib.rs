pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod worker;

pub use config::{ConsumerConfig, WorkerConfig};
pub use error::{IngestError, IngestFailure};
pub use ingest::{run, IngestLoop, IngestSummary};
pub use worker::{decode, mailbox, Worker, WorkerHandle, WorkerMessage, WorkerStats};

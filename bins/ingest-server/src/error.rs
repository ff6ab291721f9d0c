#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("backend: {0}")]
    Backend(#[from] stream_api::BackendError),

    #[error("{0}")]
    Ingest(#[from] ingest::IngestError),

    #[error("{0}")]
    Failed(#[from] ingest::IngestFailure),

    #[error("task: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

use stream_api::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("config: {0}")]
    Config(String),

    #[error("poll: {0}")]
    Poll(BackendError),

    #[error("commit: {0}")]
    Commit(BackendError),

    #[error("worker mailbox closed")]
    WorkerGone,
}

/// Fatal loop termination together with the number of records observed
/// before it happened.
#[derive(Debug, thiserror::Error)]
#[error("{error} (consumed {records_observed} records)")]
pub struct IngestFailure {
    pub records_observed: u64,
    #[source]
    pub error: IngestError,
}

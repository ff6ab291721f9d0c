use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use stream_api::StreamClient;

use crate::config::ConsumerConfig;
use crate::error::{IngestError, IngestFailure};
use crate::metrics;
use crate::worker::WorkerHandle;

/// Upper bound of the up-front batch reservation; larger batches grow on demand.
const MAX_BATCH_RESERVE: usize = 4096;

// ═══════════════════════════════════════════════════════════════
//  Summary
// ═══════════════════════════════════════════════════════════════

/// Result of a loop that stopped without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records returned by the stream, dispatched or not.
    pub records_observed: u64,
    pub commits: u64,
    /// Records left in the batch at shutdown; neither dispatched nor committed.
    pub pending: usize,
}

// ═══════════════════════════════════════════════════════════════
//  IngestLoop
// ═══════════════════════════════════════════════════════════════

/// Poll → buffer → dispatch → commit cycle.
///
/// Runs on a blocking thread. Dispatch is fire-and-forget: the offset is
/// committed as soon as every buffered payload has been handed to the
/// worker, without waiting for it to persist anything. A crash between
/// commit and worker drain loses those records.
pub struct IngestLoop<C: StreamClient> {
    client: C,
    worker: WorkerHandle,
    batch_threshold: usize,
    poll_timeout: Duration,
    token: Option<CancellationToken>,
    batch: Vec<String>,
    records_observed: u64,
    commits: u64,
    start: Instant,
    last_reported_second: u64,
}

impl<C: StreamClient> IngestLoop<C> {
    pub fn new(client: C, worker: WorkerHandle, config: &ConsumerConfig) -> Self {
        Self {
            client,
            worker,
            batch_threshold: config.batch_threshold.max(1),
            poll_timeout: config.poll_timeout(),
            token: None,
            batch: Vec::with_capacity(config.batch_threshold.min(MAX_BATCH_RESERVE)),
            records_observed: 0,
            commits: 0,
            start: Instant::now(),
            last_reported_second: 0,
        }
    }

    /// Stop before the next poll once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn records_observed(&self) -> u64 {
        self.records_observed
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// One poll cycle. Returns the number of payloads dispatched.
    pub fn step(&mut self) -> Result<usize, IngestError> {
        let records = self.client.poll(self.poll_timeout).map_err(IngestError::Poll)?;
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len() as u64;
        self.batch.extend(records.into_iter().map(|r| r.value));
        self.records_observed += count;

        let dispatched = if self.batch.len() >= self.batch_threshold {
            self.dispatch()?
        } else {
            0
        };

        self.maybe_report()?;
        Ok(dispatched)
    }

    fn dispatch(&mut self) -> Result<usize, IngestError> {
        let mut batch = std::mem::take(&mut self.batch);
        let n = batch.len();
        for payload in batch.drain(..) {
            self.worker.parse(payload)?;
        }
        self.client.commit().map_err(IngestError::Commit)?;
        self.commits += 1;
        // вернуть пустой буфер, сохранив capacity
        self.batch = batch;
        tracing::debug!(records = n, commits = self.commits, "batch dispatched and committed");
        Ok(n)
    }

    fn maybe_report(&mut self) -> Result<(), IngestError> {
        if self.start.elapsed().as_secs() <= self.last_reported_second {
            return Ok(());
        }
        self.worker.status()?;
        self.last_reported_second += 1;
        tracing::info!(
            count = self.records_observed,
            "{}",
            metrics::report(self.records_observed, self.start)
        );
        Ok(())
    }

    /// Run until a fatal error or cancellation. The client is closed on
    /// every exit path.
    pub fn run(mut self) -> Result<IngestSummary, IngestFailure> {
        tracing::info!(
            batch_threshold = self.batch_threshold,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "ingestion loop started"
        );
        self.start = Instant::now();

        let result = self.run_until_stopped();

        if let Err(e) = self.client.close() {
            tracing::warn!(error = ?e, "stream close error");
        }
        tracing::info!(
            records = self.records_observed,
            commits = self.commits,
            "consumed {} messages from stream",
            self.records_observed
        );

        match result {
            Ok(()) => Ok(IngestSummary {
                records_observed: self.records_observed,
                commits: self.commits,
                pending: self.batch.len(),
            }),
            Err(error) => {
                tracing::error!(error = %error, "ingestion loop failed");
                Err(IngestFailure {
                    records_observed: self.records_observed,
                    error,
                })
            }
        }
    }

    fn run_until_stopped(&mut self) -> Result<(), IngestError> {
        loop {
            if let Some(token) = &self.token {
                if token.is_cancelled() {
                    tracing::info!(pending = self.batch.len(), "ingestion loop cancelled");
                    return Ok(());
                }
            }
            self.step()?;
        }
    }
}

/// Build and run a loop over an already subscribed `client`.
pub fn run<C: StreamClient>(
    client: C,
    worker: WorkerHandle,
    batch_threshold: usize,
    poll_timeout: Duration,
) -> Result<IngestSummary, IngestFailure> {
    let config = ConsumerConfig::default()
        .with_batch_threshold(batch_threshold)
        .with_poll_timeout(poll_timeout);
    IngestLoop::new(client, worker, &config).run()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use stream_api::{BackendError, ErrorKind, StreamRecord};
    use tokio::sync::mpsc;

    use super::*;
    use crate::worker::{mailbox, WorkerMessage};

    /// Replays scripted poll results and records commits.
    #[derive(Default)]
    struct ScriptedClient {
        polls: VecDeque<Result<Vec<StreamRecord>, BackendError>>,
        fail_commit: bool,
        next_offset: u64,
        commits: u64,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedClient {
        fn push_values(&mut self, values: impl IntoIterator<Item = String>) {
            let batch: Vec<StreamRecord> = values
                .into_iter()
                .map(|v| {
                    let r = StreamRecord::new("t", self.next_offset, v);
                    self.next_offset += 1;
                    r
                })
                .collect();
            self.polls.push_back(Ok(batch));
        }

        fn push_n(&mut self, n: usize) {
            let start = self.next_offset;
            self.push_values((start..start + n as u64).map(|i| format!(r#"{{"i":{i}}}"#)));
        }
    }

    impl StreamClient for ScriptedClient {
        fn subscribe(&mut self, _topic: &str) -> Result<(), BackendError> {
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration) -> Result<Vec<StreamRecord>, BackendError> {
            self.polls
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::closed("script exhausted")))
        }

        fn commit(&mut self) -> Result<(), BackendError> {
            if self.fail_commit {
                return Err(BackendError::io("broker unreachable"));
            }
            self.commits += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), BackendError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn status_count(messages: &[WorkerMessage]) -> usize {
        messages.iter().filter(|m| **m == WorkerMessage::Status).count()
    }

    fn parse_count(messages: &[WorkerMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, WorkerMessage::Parse { .. }))
            .count()
    }

    #[test]
    fn flushes_exactly_at_threshold() {
        let mut client = ScriptedClient::default();
        for _ in 0..4 {
            client.push_n(3);
        }
        let (handle, mut rx) = mailbox();
        let cfg = ConsumerConfig::new("t").with_batch_threshold(5);
        let mut ingest = IngestLoop::new(client, handle, &cfg);

        assert_eq!(ingest.step().unwrap(), 0);
        assert_eq!(ingest.batch_len(), 3);
        assert_eq!(ingest.commits(), 0);

        // 6 >= 5: whole batch goes, including the overshoot
        assert_eq!(ingest.step().unwrap(), 6);
        assert_eq!(ingest.batch_len(), 0);
        assert_eq!(ingest.client().commits, 1);

        assert_eq!(ingest.step().unwrap(), 0);
        assert_eq!(ingest.step().unwrap(), 6);
        assert_eq!(ingest.batch_len(), 0);
        assert_eq!(ingest.client().commits, 2);
        assert_eq!(ingest.records_observed(), 12);

        assert_eq!(parse_count(&drain(&mut rx)), 12);
    }

    #[test]
    fn empty_poll_is_a_noop() {
        let mut client = ScriptedClient::default();
        client.polls.push_back(Ok(Vec::new()));
        let (handle, mut rx) = mailbox();
        let mut ingest = IngestLoop::new(client, handle, &ConsumerConfig::new("t"));

        assert_eq!(ingest.step().unwrap(), 0);
        assert_eq!(ingest.batch_len(), 0);
        assert_eq!(ingest.records_observed(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn dispatch_preserves_arrival_order() {
        let mut client = ScriptedClient::default();
        client.push_values(["a", "b"].map(String::from));
        client.push_values(["c", "d"].map(String::from));
        let (handle, mut rx) = mailbox();
        let cfg = ConsumerConfig::new("t").with_batch_threshold(4);
        let mut ingest = IngestLoop::new(client, handle, &cfg);
        ingest.step().unwrap();
        ingest.step().unwrap();

        let payloads: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                WorkerMessage::Parse { payload } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, ["a", "b", "c", "d"]);
    }

    #[test]
    fn poll_failure_is_fatal_and_closes_client() {
        let mut client = ScriptedClient::default();
        client.push_n(150);
        client.polls.push_back(Err(BackendError::io("connection reset")));
        let closed = client.closed.clone();
        let (handle, _rx) = mailbox();

        let failure = run(client, handle, 200, Duration::from_millis(1)).unwrap_err();
        assert_eq!(failure.records_observed, 150);
        match failure.error {
            IngestError::Poll(e) => assert_eq!(e.kind(), ErrorKind::Io),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn commit_failure_is_fatal() {
        let mut client = ScriptedClient::default();
        client.fail_commit = true;
        client.push_n(200);
        let (handle, mut rx) = mailbox();

        let failure = run(client, handle, 200, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(failure.error, IngestError::Commit(_)));
        assert_eq!(failure.records_observed, 200);
        // sends were issued before the commit was attempted
        assert_eq!(parse_count(&drain(&mut rx)), 200);
    }

    #[test]
    fn closed_mailbox_is_fatal() {
        let mut client = ScriptedClient::default();
        client.push_n(2);
        let (handle, rx) = mailbox();
        drop(rx);
        let cfg = ConsumerConfig::new("t").with_batch_threshold(2);
        let mut ingest = IngestLoop::new(client, handle, &cfg);

        assert!(matches!(ingest.step(), Err(IngestError::WorkerGone)));
        assert_eq!(ingest.client().commits, 0);
    }

    #[test]
    fn cancelled_loop_exits_cleanly_with_pending_batch() {
        let mut client = ScriptedClient::default();
        client.push_n(10);
        let (handle, _rx) = mailbox();
        let token = CancellationToken::new();
        let cfg = ConsumerConfig::new("t");
        let mut ingest = IngestLoop::new(client, handle, &cfg).with_cancellation(token.clone());
        ingest.step().unwrap();
        token.cancel();

        let summary = ingest.run().unwrap();
        assert_eq!(summary, IngestSummary { records_observed: 10, commits: 0, pending: 10 });
    }

    #[test]
    fn huge_threshold_does_not_preallocate() {
        let mut client = ScriptedClient::default();
        client.push_n(3);
        let (handle, mut rx) = mailbox();
        let cfg = ConsumerConfig::new("t").with_batch_threshold(usize::MAX / 2);
        let mut ingest = IngestLoop::new(client, handle, &cfg);
        assert!(ingest.batch.capacity() <= MAX_BATCH_RESERVE);

        assert_eq!(ingest.step().unwrap(), 0);
        assert_eq!(ingest.batch_len(), 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn status_is_sent_once_per_elapsed_second() {
        let mut client = ScriptedClient::default();
        for _ in 0..3 {
            client.push_n(1);
        }
        let (handle, mut rx) = mailbox();
        let mut ingest = IngestLoop::new(client, handle, &ConsumerConfig::new("t"));

        ingest.step().unwrap();
        assert_eq!(status_count(&drain(&mut rx)), 0);
        assert_eq!(ingest.last_reported_second, 0);

        // pretend the loop started 1.1 s ago
        ingest.start = Instant::now().checked_sub(Duration::from_millis(1100)).unwrap();
        ingest.step().unwrap();
        ingest.step().unwrap();

        let messages = drain(&mut rx);
        assert_eq!(status_count(&messages), 1);
        assert_eq!(parse_count(&messages), 0);
        assert_eq!(ingest.last_reported_second, 1);
    }
}

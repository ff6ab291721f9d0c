use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use stream_api::{BackendError, ErrorKind, StreamClient, StreamRecord};

// ═══════════════════════════════════════════════════════════════
//  MemoryStreamConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_poll_records() -> usize {
    500
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStreamConfig {
    /// Upper bound of records returned by one poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
}

impl Default for MemoryStreamConfig {
    fn default() -> Self {
        Self {
            max_poll_records: default_max_poll_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStream
// ═══════════════════════════════════════════════════════════════

/// Single partition per topic. Offset == index in `records`.
#[derive(Default)]
struct Partition {
    records: Vec<StreamRecord>,
    /// Next offset to read after a restart.
    committed: Option<u64>,
    commits: u64,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, Partition>>,
    arrived: Condvar,
}

/// In-process partitioned log with one consumer group.
///
/// Cloning yields another handle to the same log; producers and
/// consumers may live on different threads.
#[derive(Clone, Default)]
pub struct MemoryStream {
    shared: Arc<Shared>,
}

fn poisoned() -> BackendError {
    BackendError::logic("memory stream lock poisoned")
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Partition>>, BackendError> {
        self.shared.topics.lock().map_err(|_| poisoned())
    }

    /// Append a record and wake blocked consumers. Returns its offset.
    pub fn publish(
        &self,
        topic: &str,
        key: Option<String>,
        value: impl Into<String>,
    ) -> Result<u64, BackendError> {
        let mut topics = self.lock()?;
        let partition = topics.entry(topic.to_string()).or_default();
        let offset = partition.records.len() as u64;
        partition.records.push(StreamRecord {
            topic: topic.to_string(),
            key,
            value: value.into(),
            offset,
        });
        drop(topics);
        self.shared.arrived.notify_all();
        Ok(offset)
    }

    pub fn consumer(&self, config: &MemoryStreamConfig) -> MemoryConsumer {
        MemoryConsumer {
            stream: self.clone(),
            topic: None,
            position: 0,
            max_poll_records: config.max_poll_records.max(1),
            closed: false,
        }
    }

    /// Read-only view for inspection. A poisoned lock is read through:
    /// a panicked publisher leaves the log as it was, and the counters
    /// below must not report an empty topic for it.
    fn inspect(&self) -> MutexGuard<'_, HashMap<String, Partition>> {
        self.shared.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self, topic: &str) -> usize {
        self.inspect().get(topic).map_or(0, |p| p.records.len())
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    pub fn committed(&self, topic: &str) -> Option<u64> {
        self.inspect().get(topic)?.committed
    }

    pub fn commit_count(&self, topic: &str) -> u64 {
        self.inspect().get(topic).map_or(0, |p| p.commits)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConsumer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryConsumer {
    stream: MemoryStream,
    topic: Option<String>,
    /// Next offset `poll` will return.
    position: u64,
    max_poll_records: usize,
    closed: bool,
}

impl MemoryConsumer {
    pub fn position(&self) -> u64 {
        self.position
    }

    fn subscribed(&self) -> Result<String, BackendError> {
        if self.closed {
            return Err(BackendError::closed("consumer closed"));
        }
        self.topic
            .clone()
            .ok_or_else(|| BackendError::new(ErrorKind::Logic, "not subscribed"))
    }
}

impl StreamClient for MemoryConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::closed("consumer closed"));
        }
        let mut topics = self.stream.lock()?;
        let partition = topics.entry(topic.to_string()).or_default();
        self.position = partition.committed.unwrap_or(0);
        self.topic = Some(topic.to_string());
        tracing::info!(topic, position = self.position, "subscribed to memory stream");
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamRecord>, BackendError> {
        let topic = self.subscribed()?;
        let deadline = Instant::now() + timeout;

        let mut topics = self.stream.lock()?;
        loop {
            let available = topics.get(&topic).map_or(0, |p| p.records.len() as u64);
            if available > self.position {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let (guard, _) = self
                .stream
                .shared
                .arrived
                .wait_timeout(topics, deadline - now)
                .map_err(|_| poisoned())?;
            topics = guard;
        }

        let records = match topics.get(&topic) {
            Some(p) => &p.records,
            None => return Ok(Vec::new()),
        };
        let start = self.position as usize;
        let end = (start + self.max_poll_records).min(records.len());
        let batch = records[start..end].to_vec();
        self.position = end as u64;
        Ok(batch)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        let topic = self.subscribed()?;
        let mut topics = self.stream.lock()?;
        let partition = topics.entry(topic).or_default();
        partition.committed = Some(self.position);
        partition.commits += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "/apps/taq:trades";

    fn filled(n: usize) -> MemoryStream {
        let stream = MemoryStream::new();
        for i in 0..n {
            stream.publish(TOPIC, None, format!("m{i}")).unwrap();
        }
        stream
    }

    #[test]
    fn poll_returns_records_in_offset_order() {
        let stream = filled(3);
        let mut c = stream.consumer(&MemoryStreamConfig::default());
        c.subscribe(TOPIC).unwrap();

        let batch = c.poll(Duration::from_millis(10)).unwrap();
        let offsets: Vec<u64> = batch.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, [0, 1, 2]);
        assert_eq!(batch[2].value, "m2");
        assert!(c.poll(Duration::from_millis(5)).unwrap().is_empty());
    }

    #[test]
    fn poll_is_capped_by_max_poll_records() {
        let stream = filled(7);
        let mut c = stream.consumer(&MemoryStreamConfig { max_poll_records: 3 });
        c.subscribe(TOPIC).unwrap();

        let sizes: Vec<usize> = (0..4)
            .map(|_| c.poll(Duration::from_millis(1)).unwrap().len())
            .collect();
        assert_eq!(sizes, [3, 3, 1, 0]);
    }

    #[test]
    fn resubscribe_resumes_from_committed_offset() {
        let stream = filled(5);
        let mut c = stream.consumer(&MemoryStreamConfig { max_poll_records: 2 });
        c.subscribe(TOPIC).unwrap();
        c.poll(Duration::ZERO).unwrap();
        c.commit().unwrap();
        c.poll(Duration::ZERO).unwrap();
        c.close().unwrap();

        assert_eq!(stream.committed(TOPIC), Some(2));
        assert_eq!(stream.commit_count(TOPIC), 1);

        let mut again = stream.consumer(&MemoryStreamConfig::default());
        again.subscribe(TOPIC).unwrap();
        let batch = again.poll(Duration::ZERO).unwrap();
        assert_eq!(batch.first().map(|r| r.offset), Some(2));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn blocked_poll_wakes_on_publish() {
        let stream = MemoryStream::new();
        let mut c = stream.consumer(&MemoryStreamConfig::default());
        c.subscribe(TOPIC).unwrap();

        let producer = stream.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.publish(TOPIC, Some("k".into()), "late").unwrap();
        });
        let batch = c.poll(Duration::from_secs(5)).unwrap();
        t.join().unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key.as_deref(), Some("k"));
    }

    #[test]
    fn closed_and_unsubscribed_consumers_fail() {
        let stream = MemoryStream::new();
        let mut c = stream.consumer(&MemoryStreamConfig::default());
        assert_eq!(c.poll(Duration::ZERO).unwrap_err().kind(), ErrorKind::Logic);

        c.subscribe(TOPIC).unwrap();
        c.close().unwrap();
        assert_eq!(c.poll(Duration::ZERO).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(c.commit().unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn inspection_survives_a_poisoned_lock() {
        let stream = filled(3);
        let mut c = stream.consumer(&MemoryStreamConfig::default());
        c.subscribe(TOPIC).unwrap();
        c.poll(Duration::ZERO).unwrap();
        c.commit().unwrap();

        let held = stream.clone();
        let _ = std::thread::spawn(move || {
            let _guard = held.shared.topics.lock().unwrap();
            panic!("publisher died holding the lock");
        })
        .join();

        assert_eq!(stream.len(TOPIC), 3);
        assert_eq!(stream.committed(TOPIC), Some(3));
        assert_eq!(stream.commit_count(TOPIC), 1);
        assert_eq!(stream.publish(TOPIC, None, "x").unwrap_err().kind(), ErrorKind::Logic);
    }
}

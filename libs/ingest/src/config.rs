use std::time::Duration;

use serde::Deserialize;

use crate::error::IngestError;

/// `[consumer]` section: what to read and how to batch it.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Topic identifier, e.g. `/apps/stream:quotes`. May be left out of
    /// the file and supplied on the command line.
    #[serde(default)]
    pub topic: String,
    /// Upper bound of a single poll.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Buffered records that trigger dispatch + commit.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_batch_threshold() -> usize {
    200
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            poll_timeout_ms: default_poll_timeout_ms(),
            batch_threshold: default_batch_threshold(),
        }
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.topic.is_empty() {
            return Err(IngestError::Config("consumer.topic is empty".into()));
        }
        if self.batch_threshold == 0 {
            return Err(IngestError::Config("consumer.batch_threshold must be > 0".into()));
        }
        Ok(())
    }
}

/// `[worker]` section: persist retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Extra attempts after the first failed upsert/flush.
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
}

fn default_persist_retries() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            persist_retries: default_persist_retries(),
            persist_backoff_ms: default_persist_backoff_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let cfg: ConsumerConfig = toml::from_str(r#"topic = "/apps/taq:trades""#).unwrap();
        assert_eq!(cfg.poll_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.batch_threshold, 200);
        cfg.validate().unwrap();

        let worker: WorkerConfig = toml::from_str("").unwrap();
        assert_eq!(worker.persist_retries, 3);
        assert_eq!(worker.persist_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let cfg = ConsumerConfig::new("t").with_batch_threshold(0);
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));
        assert!(ConsumerConfig::new("").validate().is_err());
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

use stream_api::{BackendError, StreamClient, StreamRecord};

use super::config::{DiskRecord, FileStreamConfig, TopicPaths};

/// Sleep between checks for new lines while a poll waits.
const TAIL_INTERVAL: Duration = Duration::from_millis(10);

// ════════════════════════════════════════════════════════════════
//  FileConsumer
// ════════════════════════════════════════════════════════════════

struct Subscription {
    topic: String,
    paths: TopicPaths,
    /// Opened lazily: the log may not exist yet.
    reader: Option<BufReader<File>>,
    /// Byte position just past the last complete line consumed.
    read_pos: u64,
}

/// Tails a topic log written by `FileTopicWriter`. `commit` stores the
/// next offset in the group's offset file.
pub struct FileConsumer {
    config: FileStreamConfig,
    sub: Option<Subscription>,
    /// Next offset `poll` will return.
    position: u64,
    closed: bool,
}

impl FileConsumer {
    pub fn new(config: FileStreamConfig) -> Self {
        Self {
            config,
            sub: None,
            position: 0,
            closed: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::closed("consumer closed"));
        }
        Ok(())
    }

    /// Read complete lines until `max` records were collected or the end of
    /// the log is reached.
    fn read_available(&mut self, max: usize) -> Result<Vec<StreamRecord>, BackendError> {
        let sub = self
            .sub
            .as_mut()
            .ok_or_else(|| BackendError::logic("not subscribed"))?;

        if sub.reader.is_none() {
            let log = sub.paths.log();
            if !log.exists() {
                return Ok(Vec::new());
            }
            let f = File::open(&log).map_err(|e| BackendError::io(format!("open {}: {e}", log.display())))?;
            sub.reader = Some(BufReader::new(f));
            sub.read_pos = 0;
        }
        let Some(reader) = sub.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let mut line = String::new();
        while out.len() < max {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| BackendError::io(format!("read line: {e}")))?;
            if n == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // writer is mid-line: rewind and retry on the next poll
                reader
                    .seek(SeekFrom::Start(sub.read_pos))
                    .map_err(|e| BackendError::io(format!("seek: {e}")))?;
                break;
            }
            sub.read_pos += n as u64;

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            let record: DiskRecord = serde_json::from_str(trimmed)
                .map_err(|e| BackendError::format(format!("{} @{}: {e}", sub.topic, sub.read_pos)))?;
            if record.offset < self.position {
                continue;
            }
            self.position = record.offset + 1;
            out.push(StreamRecord {
                topic: sub.topic.clone(),
                key: record.key,
                value: record.value,
                offset: record.offset,
            });
        }
        Ok(out)
    }
}

impl StreamClient for FileConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), BackendError> {
        self.check_open()?;
        let paths = TopicPaths::new(&self.config.data_dir, topic);
        let offset_path = paths.offset(&self.config.group);

        self.position = if offset_path.exists() {
            let raw = std::fs::read_to_string(&offset_path)
                .map_err(|e| BackendError::io(format!("read {}: {e}", offset_path.display())))?;
            raw.trim()
                .parse::<u64>()
                .map_err(|e| BackendError::format(format!("{}: {e}", offset_path.display())))?
        } else {
            0
        };

        tracing::info!(
            topic,
            group = %self.config.group,
            position = self.position,
            "subscribed to file stream"
        );
        self.sub = Some(Subscription {
            topic: topic.to_string(),
            paths,
            reader: None,
            read_pos: 0,
        });
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamRecord>, BackendError> {
        self.check_open()?;
        let deadline = Instant::now() + timeout;
        let max = self.config.max_poll_records.max(1);
        loop {
            let records = self.read_available(max)?;
            if !records.is_empty() {
                return Ok(records);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(records);
            }
            std::thread::sleep(TAIL_INTERVAL.min(deadline - now));
        }
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        self.check_open()?;
        let sub = self
            .sub
            .as_ref()
            .ok_or_else(|| BackendError::logic("not subscribed"))?;
        std::fs::create_dir_all(&sub.paths.dir)
            .map_err(|e| BackendError::io(format!("mkdir {}: {e}", sub.paths.dir.display())))?;

        // write tmp + fsync + rename: the offset file is never half-written
        let path = sub.paths.offset(&self.config.group);
        let tmp = path.with_extension("offset.tmp");
        let mut f = File::create(&tmp).map_err(|e| BackendError::io(format!("create {}: {e}", tmp.display())))?;
        writeln!(f, "{}", self.position).map_err(|e| BackendError::io(format!("write: {e}")))?;
        f.sync_all().map_err(|e| BackendError::io(format!("fsync: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| BackendError::io(format!("rename {}: {e}", path.display())))?;
        tracing::debug!(topic = %sub.topic, position = self.position, "offset committed");
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        self.sub = None;
        Ok(())
    }
}

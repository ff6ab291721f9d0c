use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use stream_api::{now_ms, BackendError};

use super::config::{DiskRecord, TopicPaths};

// ════════════════════════════════════════════════════════════════
//  FileTopicWriter
// ════════════════════════════════════════════════════════════════

/// Appends records to a topic log, assigning consecutive offsets.
pub struct FileTopicWriter {
    topic: String,
    file: File,
    next_offset: u64,
}

impl FileTopicWriter {
    pub fn open(data_dir: impl AsRef<Path>, topic: &str) -> Result<Self, BackendError> {
        let paths = TopicPaths::new(data_dir, topic);
        std::fs::create_dir_all(&paths.dir)
            .map_err(|e| BackendError::io(format!("mkdir {}: {e}", paths.dir.display())))?;

        let log = paths.log();
        let next_offset = if log.exists() { last_offset(&log)?.map_or(0, |o| o + 1) } else { 0 };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .map_err(|e| BackendError::io(format!("open {}: {e}", log.display())))?;
        tracing::info!(topic, path = %log.display(), next_offset, "topic log opened for append");

        Ok(Self {
            topic: topic.to_string(),
            file,
            next_offset,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Append one record. Returns the offset it was assigned.
    pub fn append(&mut self, key: Option<String>, value: impl Into<String>) -> Result<u64, BackendError> {
        let offset = self.next_offset;
        let mut line = serde_json::to_vec(&DiskRecord {
            offset,
            ts_ms: now_ms(),
            key,
            value: value.into(),
        })?;
        line.push(b'\n');
        // одна запись write_all на строку: читатель не увидит склейку
        self.file
            .write_all(&line)
            .map_err(|e| BackendError::io(format!("write: {e}")))?;
        self.next_offset += 1;
        Ok(offset)
    }

    pub fn flush(&mut self) -> Result<(), BackendError> {
        self.file
            .sync_data()
            .map_err(|e| BackendError::io(format!("fsync: {e}")))
    }
}

/// Offset of the last complete line in `log`.
fn last_offset(log: &Path) -> Result<Option<u64>, BackendError> {
    let f = File::open(log).map_err(|e| BackendError::io(format!("open {}: {e}", log.display())))?;
    let mut last = None;
    for line in BufReader::new(f).lines() {
        let line = line.map_err(|e| BackendError::io(format!("read line: {e}")))?;
        if line.is_empty() {
            continue;
        }
        let record: DiskRecord = serde_json::from_str(&line)
            .map_err(|e| BackendError::format(format!("{}: {e}", log.display())))?;
        last = Some(record.offset);
    }
    Ok(last)
}

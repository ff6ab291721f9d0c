use std::path::{Path, PathBuf};

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_group() -> String {
    "ingest".into()
}

fn default_max_poll_records() -> usize {
    500
}

/// `[stream]` config for `backend = "file"`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStreamConfig {
    pub data_dir: String,
    /// Consumer group; names the committed-offset file.
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
}

impl FileStreamConfig {
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            group: default_group(),
            max_poll_records: default_max_poll_records(),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Layout
// ════════════════════════════════════════════════════════════════

/// On-disk layout of one topic:
///
/// ```text
/// {data_dir}/{topic}/log.jsonl       records, one per line
/// {data_dir}/{topic}/{group}.offset  next offset to read
/// ```
///
/// Characters outside `[A-Za-z0-9._-]` in the topic name become `_`, so
/// `/apps/stream:quotes` maps to `_apps_stream_quotes`.
#[derive(Debug, Clone)]
pub struct TopicPaths {
    pub dir: PathBuf,
}

impl TopicPaths {
    pub fn new(data_dir: impl AsRef<Path>, topic: &str) -> Self {
        let name: String = topic
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        Self {
            dir: data_dir.as_ref().join(name),
        }
    }

    pub fn log(&self) -> PathBuf {
        self.dir.join("log.jsonl")
    }

    pub fn offset(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{group}.offset"))
    }
}

// ════════════════════════════════════════════════════════════════
//  On-disk record format
// ════════════════════════════════════════════════════════════════

#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DiskRecord {
    pub offset: u64,
    pub ts_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

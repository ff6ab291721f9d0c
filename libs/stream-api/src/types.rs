use serde::{Deserialize, Serialize};

/// Field under which the generated document id is stored.
pub const ID_FIELD: &str = "_id";

/// Structured form of a decoded payload.
pub type Document = serde_json::Map<String, serde_json::Value>;

// ════════════════════════════════════════════════════════════════
//  StreamRecord
// ════════════════════════════════════════════════════════════════

/// One record read from a partition of the stream.
///
/// `offset` grows monotonically within a partition. The payload is kept
/// as text; decoding happens downstream in the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub topic: String,
    #[serde(default)]
    pub key: Option<String>,
    pub value: String,
    pub offset: u64,
}

impl StreamRecord {
    pub fn new(topic: impl Into<String>, offset: u64, value: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            offset,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_collection() -> String {
    "documents".into()
}

/// `[store]` config for `backend = "file"`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStoreConfig {
    pub data_dir: String,
    /// File stem: documents land in `{data_dir}/{collection}.jsonl`.
    #[serde(default = "default_collection")]
    pub collection: String,
}

// ════════════════════════════════════════════════════════════════
//  On-disk format
// ════════════════════════════════════════════════════════════════

/// One line of the collection file. Later lines for the same id win.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DiskDocument {
    pub id: String,
    pub document: stream_api::Document,
}

use std::collections::HashMap;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use stream_api::{BackendError, Document, DocumentStore};

use super::config::{DiskDocument, FileStoreConfig};

// ════════════════════════════════════════════════════════════════
//  FileDocumentStore
// ════════════════════════════════════════════════════════════════

/// Append-only JSONL collection. `upsert` appends a line; `flush` pushes
/// the buffer to the OS and fsyncs. Reads replay the file, so the last
/// line for an id is its current value.
///
/// A write that fails part-way may leave a fragment at the end of the
/// file. The next append starts on a fresh line, and `load` skips lines
/// that do not parse.
pub struct FileDocumentStore {
    path: PathBuf,
    writer: Mutex<Sink>,
}

struct Sink {
    out: BufWriter<File>,
    /// The file may end mid-line.
    torn: bool,
}

impl FileDocumentStore {
    pub async fn open(config: &FileStoreConfig) -> Result<Self, BackendError> {
        let dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BackendError::io(format!("mkdir {}: {e}", dir.display())))?;

        let path = dir.join(format!("{}.jsonl", config.collection));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| BackendError::io(format!("open {}: {e}", path.display())))?;
        let torn = ends_mid_line(&path).await?;
        tracing::info!(path = %path.display(), torn, "file document store opened");

        Ok(Self {
            path,
            writer: Mutex::new(Sink {
                out: BufWriter::new(file),
                torn,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current documents by id, as of the last flush. Unparsable lines are
    /// logged and skipped.
    pub async fn load(&self) -> Result<HashMap<String, Document>, BackendError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| BackendError::io(format!("read {}: {e}", self.path.display())))?;

        let mut docs = HashMap::new();
        for (n, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<DiskDocument>(line) {
                Ok(disk) => {
                    docs.insert(disk.id, disk.document);
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = n + 1, error = %e, "skipping torn line");
                }
            }
        }
        Ok(docs)
    }

    async fn append(&self, id: String, document: Document) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(&DiskDocument { id, document })?;
        line.push(b'\n');
        let mut sink = self.writer.lock().await;
        if sink.torn {
            line.insert(0, b'\n');
        }
        match sink.out.write_all(&line).await {
            Ok(()) => {
                sink.torn = false;
                Ok(())
            }
            Err(e) => {
                sink.torn = true;
                Err(BackendError::io(format!("write: {e}")))
            }
        }
    }

    async fn sync(&self) -> Result<(), BackendError> {
        let mut sink = self.writer.lock().await;
        if let Err(e) = sink.out.flush().await {
            sink.torn = true;
            return Err(BackendError::io(format!("flush: {e}")));
        }
        sink.out
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| BackendError::io(format!("fsync: {e}")))
    }
}

/// True when `path` is non-empty and its last byte is not a newline.
async fn ends_mid_line(path: &Path) -> Result<bool, BackendError> {
    let io = |e: std::io::Error| BackendError::io(format!("inspect {}: {e}", path.display()));
    let mut f = File::open(path).await.map_err(io)?;
    let len = f.metadata().await.map_err(io)?.len();
    if len == 0 {
        return Ok(false);
    }
    f.seek(SeekFrom::End(-1)).await.map_err(io)?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last).await.map_err(io)?;
    Ok(last[0] != b'\n')
}

impl DocumentStore for FileDocumentStore {
    fn upsert(
        &self,
        id: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(self.append(id, document))
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(self.sync())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> FileStoreConfig {
        FileStoreConfig {
            data_dir: dir.path().join("db").to_string_lossy().into_owned(),
            collection: "trades".into(),
        }
    }

    fn doc(pairs: &[(&str, i64)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    #[tokio::test]
    async fn flushed_writes_are_visible_and_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(&config(&dir)).await.unwrap();
        assert!(store.path().ends_with("db/trades.jsonl"));

        store.upsert("a", doc(&[("qty", 1)])).await.unwrap();
        store.upsert("b", doc(&[("qty", 2)])).await.unwrap();
        store.upsert("a", doc(&[("qty", 5)])).await.unwrap();
        store.flush().await.unwrap();

        let docs = store.load().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs["a"]["qty"], 5);
        assert_eq!(docs["b"]["qty"], 2);
    }

    #[tokio::test]
    async fn reopen_appends_to_existing_collection() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileDocumentStore::open(&config(&dir)).await.unwrap();
            store.upsert("a", doc(&[("v", 1)])).await.unwrap();
            store.flush().await.unwrap();
        }
        let store = FileDocumentStore::open(&config(&dir)).await.unwrap();
        store.upsert("b", doc(&[("v", 2)])).await.unwrap();
        store.flush().await.unwrap();

        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fragment_left_by_failed_write_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(&config(&dir)).await.unwrap();
        store.upsert("a", doc(&[("v", 1)])).await.unwrap();
        store.flush().await.unwrap();

        // half a line, as if a write died part-way
        let mut raw = tokio::fs::OpenOptions::new().append(true).open(store.path()).await.unwrap();
        raw.write_all(br#"{"id":"b","docu"#).await.unwrap();
        raw.flush().await.unwrap();
        store.writer.lock().await.torn = true;

        store.upsert("b", doc(&[("v", 2)])).await.unwrap();
        store.flush().await.unwrap();

        let docs = store.load().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs["b"]["v"], 2);
    }

    #[tokio::test]
    async fn reopen_after_torn_tail_starts_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        {
            let store = FileDocumentStore::open(&cfg).await.unwrap();
            store.upsert("a", doc(&[("v", 1)])).await.unwrap();
            store.flush().await.unwrap();
            let mut raw = tokio::fs::OpenOptions::new().append(true).open(store.path()).await.unwrap();
            raw.write_all(b"{\"id\":").await.unwrap();
            raw.flush().await.unwrap();
        }

        let store = FileDocumentStore::open(&cfg).await.unwrap();
        assert!(store.writer.lock().await.torn);
        store.upsert("c", doc(&[("v", 3)])).await.unwrap();
        store.flush().await.unwrap();

        let docs = store.load().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs["c"]["v"], 3);
        assert!(!store.writer.lock().await.torn);
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use uuid::Uuid;

use crate::{
    persistence::{DurableBackend, PersistError},
    store::UrlStore,
};

/// One line of the storage file.
///
/// ```json
/// {"uuid":"…","short_url":"http://localhost:8080/F870F1E9","original_url":"us-…@https://…"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub uuid: String,
    pub short_url: String,
    pub original_url: String,
}

/// Append-only JSON-lines storage.
///
/// Records carry the full short URL, so the file is tied to the base URL it
/// was written with. Writers are serialised so concurrent appends never
/// interleave, and a rewrite never races an append.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    base_url: String,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            base_url: base_url.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, short_id: &str, original_url: &str) -> FileRecord {
        FileRecord {
            uuid: Uuid::new_v4().to_string(),
            short_url: format!("{}/{}", self.base_url, short_id),
            original_url: original_url.to_owned(),
        }
    }

    fn short_id<'a>(&self, short_url: &'a str) -> Option<&'a str> {
        short_url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    async fn ensure_parent_dir(&self) -> Result<(), PersistError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Replace the file contents with the current contents of `store`.
    ///
    /// The file cannot drop a single record, so deletions are reflected by
    /// writing the whole store back out. The snapshot is taken under the
    /// writer lock: an append that lands after it is still on disk, and of
    /// two rewrites the later one always carries the newer state.
    pub async fn rewrite(&self, store: &UrlStore) -> Result<usize, PersistError> {
        let _guard = self.write_lock.lock().await;

        let data = store.snapshot();
        let mut buf = Vec::new();
        for (short_id, value) in &data {
            serde_json::to_writer(&mut buf, &self.record(short_id, value))?;
            buf.push(b'\n');
        }

        self.ensure_parent_dir().await?;
        fs::write(&self.path, buf).await?;

        tracing::info!("{} record(s) written to {}", data.len(), self.path.display());
        Ok(data.len())
    }
}

#[async_trait]
impl DurableBackend for FileStorage {
    async fn store(&self, short_id: &str, original_url: &str) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(&self.record(short_id, original_url))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_parent_dir().await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record. A missing file is the first-launch case and reads
    /// as empty. Reading stops at the first line that does not parse.
    async fn get_all(&self) -> Result<HashMap<String, String>, PersistError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "File storage {} not found. Probably this is the first launch.",
                    self.path.display()
                );
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: FileRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Stopping at malformed record in {}: {}", self.path.display(), e);
                    break;
                }
            };
            match self.short_id(&record.short_url) {
                Some(short_id) => {
                    data.insert(short_id.to_owned(), record.original_url);
                }
                None => tracing::warn!(
                    "Skipping record '{}': not under base URL {}",
                    record.short_url,
                    self.base_url
                ),
            }
        }
        Ok(data)
    }

    async fn is_available(&self) -> bool {
        match fs::metadata(&self.path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => e.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

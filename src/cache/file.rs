/// File-backed cache backend
use crate::{
    cache::{freshness_window, CacheBackend, ResolutionRecord},
    error::{ResolverError, ResolverResult},
};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type Document = HashMap<String, ResolutionRecord>;

/// JSON document backend
///
/// The whole store lives in one file mapping identity -> record. Writes replace
/// the file atomically (temp file + rename); a missing or unreadable document
/// is an empty store. Stale entries are dropped whenever the document is
/// rewritten.
pub struct FileBackend {
    path: PathBuf,
    ttl: Duration,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: PathBuf, ttl: std::time::Duration) -> ResolverResult<Self> {
        Ok(Self {
            path,
            ttl: freshness_window(ttl.as_secs())?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document
    async fn load(&self) -> Document {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Document::new(),
            Err(e) => {
                warn!("Failed to read cache file {}: {}", self.path.display(), e);
                return Document::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "Cache file {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Document::new()
            }
        }
    }

    /// Replace the whole document on disk
    async fn store(&self, document: &Document) -> ResolverResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(document).map_err(|e| {
            ResolverError::Storage(format!("Failed to serialize cache document: {}", e))
        })?;

        let tmp_path = self.tmp_path();
        if let Err(e) = fs::write(&tmp_path, json).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ResolverError::Storage(format!(
                "Failed to write cache file {}: {}",
                tmp_path.display(),
                e
            )));
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                warn!(
                    "Failed to remove temp file {}: {}",
                    tmp_path.display(),
                    cleanup
                );
            }
            return Err(ResolverError::Storage(format!(
                "Failed to replace cache file {}: {}",
                self.path.display(),
                e
            )));
        }

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>> {
        let mut document = self.load().await;

        match document.remove(identity) {
            Some(record) if record.is_fresh(self.ttl) => {
                debug!("File cache HIT: {}", identity);
                Ok(Some(record))
            }
            Some(_) => {
                debug!("File cache STALE: {}", identity);
                Ok(None)
            }
            None => {
                debug!("File cache MISS: {}", identity);
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &ResolutionRecord) -> ResolverResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.load().await;
        if let Some(existing) = document.get(&record.identity) {
            if existing.recorded_at > record.recorded_at {
                debug!("Skipping older record for {}", record.identity);
                return Ok(());
            }
        }
        document.insert(record.identity.clone(), record.clone());

        let before = document.len();
        document.retain(|_, entry| entry.is_fresh(self.ttl));
        if document.len() < before {
            debug!(
                "Pruned {} stale records from {}",
                before - document.len(),
                self.path.display()
            );
        }

        self.store(&document).await?;
        debug!("File cache SET: {}", record.identity);
        Ok(())
    }

    async fn clear(&self, identity: Option<&str>) -> ResolverResult<()> {
        let _guard = self.write_lock.lock().await;

        let document = match identity {
            Some(identity) => {
                let mut document = self.load().await;
                if document.remove(identity).is_none() {
                    return Ok(());
                }
                document
            }
            None => Document::new(),
        };

        self.store(&document).await
    }
}

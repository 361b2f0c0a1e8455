//! File-backed store shared between processes on one host.
//!
//! Each key is one JSON file named after the URL-safe base64 of the key.
//! Writes go through a temp file and a rename; mutations serialize on a
//! lock file created with `create_new`, which is what makes
//! `compare_and_swap` atomic across processes. Expired records are removed
//! under that lock whenever a read or scan runs into them.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{KeyValueStore, TaskError};

const LOCK_FILE: &str = ".lock";
const RECORD_EXT: &str = "json";
const LOCK_STALE_AFTER: Duration = Duration::from_secs(5);
const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(5);

// A crashed holder's lock must turn stale before waiters give up.
const _: () = assert!(LOCK_WAIT.as_millis() > LOCK_STALE_AFTER.as_millis());

#[derive(Serialize, Deserialize)]
struct Record {
    value: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl Record {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        Self { value, expires_at }
    }

    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Utc::now())
    }
}

enum Slot {
    Empty,
    Live(Record),
    Expired,
}

impl Slot {
    fn into_value(self) -> Option<String> {
        match self {
            Self::Live(record) => Some(record.value),
            Self::Empty | Self::Expired => None,
        }
    }
}

struct DirLock {
    path: PathBuf,
    released: bool,
}

impl DirLock {
    async fn release(mut self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove store lock");
        }
        self.released = true;
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Only reached when the holding future was cancelled.
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn backend(context: &str, err: impl std::fmt::Display) -> TaskError {
    TaskError::Backend(format!("{context}: {err}"))
}

/// Directory-backed store; every process pointing at the same directory
/// shares state.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Backend` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TaskError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| backend("create store dir", e))?;
        Ok(Self { dir })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXT}", URL_SAFE_NO_PAD.encode(key)))
    }

    fn key_of(path: &Path) -> Option<String> {
        if path.extension()? != RECORD_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    async fn read_slot(path: &Path) -> Result<Slot, TaskError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Slot::Empty),
            Err(e) => return Err(backend("read record", e)),
        };
        let record: Record = serde_json::from_str(&raw).map_err(|e| backend("parse record", e))?;
        Ok(if record.is_live() {
            Slot::Live(record)
        } else {
            Slot::Expired
        })
    }

    async fn write_record(path: &Path, record: &Record) -> Result<(), TaskError> {
        let raw = serde_json::to_string(record).map_err(|e| backend("encode record", e))?;
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, raw)
            .await
            .map_err(|e| backend("write record", e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| backend("commit record", e))
    }

    async fn remove_record(path: &Path) -> Result<(), TaskError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend("remove record", e)),
        }
    }

    /// Read under the lock, dropping the file if it has expired.
    async fn read_live(path: &Path) -> Result<Option<String>, TaskError> {
        let slot = Self::read_slot(path).await?;
        if matches!(slot, Slot::Expired) {
            Self::remove_record(path).await?;
        }
        Ok(slot.into_value())
    }

    async fn lock_age(path: &Path) -> Option<Duration> {
        let modified = fs::metadata(path).await.ok()?.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    async fn lock(&self) -> Result<DirLock, TaskError> {
        let path = self.dir.join(LOCK_FILE);
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    return Ok(DirLock {
                        path,
                        released: false,
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::lock_age(&path)
                        .await
                        .is_some_and(|age| age > LOCK_STALE_AFTER)
                    {
                        warn!(path = %path.display(), "removing stale store lock");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                }
                Err(e) => return Err(backend("acquire store lock", e)),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TaskError::Backend("timed out waiting for store lock".into()));
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    async fn locked<T>(
        &self,
        op: impl Future<Output = Result<T, TaskError>> + Send,
    ) -> Result<T, TaskError> {
        let guard = self.lock().await?;
        let out = op.await;
        guard.release().await;
        out
    }

    async fn purge(&self, paths: Vec<PathBuf>) -> Result<(), TaskError> {
        if paths.is_empty() {
            return Ok(());
        }
        let purged = paths.len();
        self.locked(async {
            for path in &paths {
                Self::read_live(path).await?;
            }
            Ok(())
        })
        .await?;
        debug!(purged, "expired records removed");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TaskError> {
        let path = self.path_for(key);
        match Self::read_slot(&path).await? {
            Slot::Expired => {
                self.purge(vec![path]).await?;
                Ok(None)
            }
            slot => Ok(slot.into_value()),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), TaskError> {
        let path = self.path_for(key);
        let record = Record::new(value, ttl);
        self.locked(Self::write_record(&path, &record)).await
    }

    async fn delete(&self, key: &str) -> Result<(), TaskError> {
        let path = self.path_for(key);
        self.locked(Self::remove_record(&path)).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, TaskError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| backend("list store dir", e))?;
        let mut keys = Vec::new();
        let mut expired = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| backend("list store dir", e))?
        {
            let path = entry.path();
            let Some(key) = Self::key_of(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            match Self::read_slot(&path).await? {
                Slot::Live(_) => keys.push(key),
                Slot::Expired => expired.push(path),
                Slot::Empty => {}
            }
        }
        self.purge(expired).await?;
        keys.sort();
        Ok(keys)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<String>,
        ttl: Option<Duration>,
    ) -> Result<bool, TaskError> {
        let path = self.path_for(key);
        self.locked(async {
            let current = Self::read_live(&path).await?;
            if current.as_deref() != expected {
                return Ok(false);
            }
            match new {
                Some(value) => Self::write_record(&path, &Record::new(value, ttl)).await?,
                None => Self::remove_record(&path).await?,
            }
            Ok(true)
        })
        .await
    }
}

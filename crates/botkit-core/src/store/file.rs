//! Filesystem backend.
//!
//! Keys of the form `prefix:name` are stored as `<base>/prefix/name.json`;
//! keys without a prefix live directly under `<base>`. Writes go to a
//! temporary file that is then renamed over the target, so readers never see
//! a partially written record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::KvBackend;
use crate::error::{StoreError, StoreResult};

/// Backend storing one JSON file per key under a base directory.
#[derive(Debug)]
pub struct FileBackend {
    base_dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl FileBackend {
    /// Creates a backend rooted at `base_dir`. The directory is created on first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Maps a key to its file path, rejecting anything that could escape `base_dir`.
    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        };

        match key.split_once(':') {
            Some((prefix, name)) if valid(prefix) && valid(name) => {
                Ok(self.base_dir.join(prefix).join(format!("{name}.json")))
            }
            None if valid(key) => Ok(self.base_dir.join(format!("{key}.json"))),
            _ => Err(StoreError::InvalidKey(key.to_string())),
        }
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read store file");
                Err(e.into())
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{seq}.tmp"));
        tokio::fs::write(&tmp, &value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = value.len(), "Store file written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Filesystem-backed key-value store.
//!
//! Each key is stored as one file under the data directory. Writes are
//! atomic (temp file + fsync + rename) to prevent corruption on crash.
//! Key names are sanitized into filenames; the mapping is stable so values
//! written by older builds stay reachable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::KvStore;
use crate::error::{Result, SessionError};

/// Filesystem-backed [`KvStore`], one file per key.
#[derive(Debug, Clone)]
pub struct FsKvStore {
    data_dir: PathBuf,
}

impl FsKvStore {
    /// Create a new store rooted at `data_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            SessionError::Store(format!(
                "failed to create store directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self { data_dir })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.kv", sanitize_key(key)))
    }
}

/// Map a key to a filename-safe form. Alphanumerics, `-`, `_` and `.` pass
/// through; everything else becomes `_`. Character names can contain
/// arbitrary text, so collisions are possible but harmless for this data
/// (last-writer-wins keys).
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| SessionError::Store(format!("failed to read {}: {e}", path.display())))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        // Write to a temp file in the same directory for an atomic rename.
        let tmp_path = self.data_dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("entry")
        ));
        std::fs::write(&tmp_path, value.as_bytes()).map_err(|e| {
            SessionError::Store(format!(
                "failed to write temp file {}: {e}",
                tmp_path.display()
            ))
        })?;
        if let Ok(file) = std::fs::File::open(&tmp_path) {
            let _ = file.sync_all();
        }
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            SessionError::Store(format!("failed to rename temp file to {}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                SessionError::Store(format!("failed to delete {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }
}

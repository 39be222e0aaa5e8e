//! Persisted conversation-key → session-id mapping.
//!
//! The backing file is a single JSON object (key string → id string),
//! rewritten in full on every mutation. Write-through, not batched:
//! durability over throughput. This file is the only source of truth for
//! which sessions the bridge manages.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{AppError, Result};

/// Write-through store for the key → session-id mapping.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl SessionStore {
    /// Open the store at `path`, loading any existing mapping file.
    ///
    /// A missing file yields an empty store. A present-but-unreadable file
    /// is an error: silently starting empty would orphan every mapped
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` if the file exists but cannot be read or
    /// parsed, or if the parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AppError::Persist(format!("cannot create data dir: {err}")))?;
        }

        let map = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|err| AppError::Persist(format!("cannot read session map: {err}")))?;
            let map: BTreeMap<String, String> = serde_json::from_str(&raw)
                .map_err(|err| AppError::Persist(format!("corrupt session map: {err}")))?;
            info!(count = map.len(), path = %path.display(), "loaded session mappings");
            map
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, map })
    }

    /// Look up the remote session id mapped to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Map `key` to `session_id`, replacing any previous id, and rewrite the
    /// backing file before returning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` if the rewrite fails; the in-memory
    /// mapping keeps the new value so a later mutation can retry the write.
    pub fn insert(&mut self, key: &str, session_id: &str) -> Result<()> {
        self.map.insert(key.to_owned(), session_id.to_owned());
        self.save()
    }

    /// Remove the mapping for `key` and rewrite the backing file.
    ///
    /// Returns whether a mapping existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persist` if the rewrite fails.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let removed = self.map.remove(key).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Number of stored mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store has no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.map)
            .map_err(|err| AppError::Persist(format!("cannot serialise session map: {err}")))?;

        // Full rewrite through a sibling temp file so a crash mid-write
        // cannot truncate the live mapping.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| AppError::Persist(format!("cannot write session map: {err}")))?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            warn!(path = %self.path.display(), %err, "session map rename failed");
            AppError::Persist(format!("cannot replace session map: {err}"))
        })
    }
}

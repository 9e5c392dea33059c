//! Key-value storage backends
//!
//! String-keyed, string-valued storage with the semantics of a browser
//! `localStorage`: synchronous single-record reads and writes plus a full key
//! scan. Two backends are provided:
//! - [`MemoryStorage`]: in-memory, instrumented with a scan counter (tests)
//! - [`FileStorage`]: JSON file with write-then-rename saves
//!
//! Writes made by another process to the same file surface through
//! [`FileStorage::reload`] as [`StorageChange`] records.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::config::{APP_DIR, STORAGE_FILENAME};

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupted: {0}")]
    Corruption(String),

    #[error("storage quota exceeded while writing '{key}'")]
    QuotaExceeded { key: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A change observed on the backing store from outside this process.
/// `key == None` means the whole store was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Pluggable synchronous key-value backend
pub trait KeyValueStore {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Enumerate every stored key. O(n) in the number of stored records.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Keys starting with `prefix` (a full scan filtered in place)
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Storage
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory backend. Counts full key scans so callers can assert that a
/// code path stays O(1).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RefCell<BTreeMap<String, String>>,
    scans: Cell<usize>,
    quota_bytes: Option<usize>,
    unavailable: Cell<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        storage
            .data
            .borrow_mut()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        storage
    }

    /// Cap the total stored bytes (keys + values)
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Make every operation fail, as in a sandboxed context
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    /// Number of full key scans performed so far
    pub fn scan_count(&self) -> usize {
        self.scans.get()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.get() {
            return Err(StorageError::Unavailable("memory storage disabled".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStorage {
    fn name(&self) -> &str {
        "MemoryStorage"
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_available()?;
        Ok(self.data.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_available()?;
        if let Some(quota) = self.quota_bytes {
            let data = self.data.borrow();
            let current: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if current + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded { key: key.to_string() });
            }
        }
        self.data
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.check_available()?;
        self.data.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check_available()?;
        self.scans.set(self.scans.get() + 1);
        Ok(self.data.borrow().keys().cloned().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Storage
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk format of the storage file
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageFile {
    #[serde(default = "default_file_version")]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

fn default_file_version() -> u32 {
    1
}

/// JSON-file backend with an in-memory cache. Every write persists
/// immediately; there is no coalescing.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    cache: RefCell<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Default storage file under the platform config directory
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push(STORAGE_FILENAME);
        path
    }

    /// Open (or lazily create) the storage file at `path`
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        info!(path = %path.display(), entries = entries.len(), "Opened key-value storage");
        Ok(Self {
            path,
            cache: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and report every key that differs from the cache
    pub fn reload(&self) -> StorageResult<Vec<StorageChange>> {
        let fresh = read_entries(&self.path)?;
        let mut cache = self.cache.borrow_mut();

        let mut changes = Vec::new();
        if fresh.is_empty() && !cache.is_empty() {
            changes.push(StorageChange {
                key: None,
                old_value: None,
                new_value: None,
            });
        } else {
            for (key, value) in &fresh {
                let old = cache.get(key);
                if old != Some(value) {
                    changes.push(StorageChange {
                        key: Some(key.clone()),
                        old_value: old.cloned(),
                        new_value: Some(value.clone()),
                    });
                }
            }
            for (key, value) in cache.iter() {
                if !fresh.contains_key(key) {
                    changes.push(StorageChange {
                        key: Some(key.clone()),
                        old_value: Some(value.clone()),
                        new_value: None,
                    });
                }
            }
        }

        *cache = fresh;
        debug!(path = %self.path.display(), changes = changes.len(), "Reloaded key-value storage");
        Ok(changes)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = StorageFile {
            version: default_file_version(),
            entries: entries.clone(),
        };

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let handle = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(handle);
            serde_json::to_writer_pretty(&mut writer, &file).map_err(|e| {
                StorageError::Corruption(format!("failed to serialize storage: {e}"))
            })?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Apply `mutate` to the cache and persist; the cache is rolled back if
    /// the write fails
    fn mutate(&self, mutate: impl FnOnce(&mut BTreeMap<String, String>)) -> StorageResult<()> {
        let mut cache = self.cache.borrow_mut();
        let mut next = cache.clone();
        mutate(&mut next);
        self.persist(&next)?;
        *cache = next;
        Ok(())
    }
}

fn read_entries(path: &Path) -> StorageResult<BTreeMap<String, String>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let file: StorageFile = serde_json::from_str(&contents)
        .map_err(|e| StorageError::Corruption(format!("{}: {e}", path.display())))?;
    Ok(file.entries)
}

impl KeyValueStore for FileStorage {
    fn name(&self) -> &str {
        "FileStorage"
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.cache.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        if !self.cache.borrow().contains_key(key) {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.cache.borrow().keys().cloned().collect())
    }
}

//! Durable key-value storage for session state.
//!
//! Values are plain strings keyed by name, mirroring browser local storage.
//! The file-backed store keeps the whole map in one JSON document and rewrites
//! it atomically (temp file + rename) under a mutex, so concurrent writers see
//! last-write-wins semantics and a crash never leaves a partial file behind.
//! Each mutation re-reads the file first, so processes sharing a state dir only
//! overwrite the keys they write. Reads serve the map as of the last open or
//! mutation.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const KEY_TOKEN: &str = "token";
pub const KEY_USER: &str = "user";
pub const KEY_LANGUAGE: &str = "language";
pub const KEY_CURRENCY: &str = "currency";
pub const KEY_CART_ITEMS: &str = "cart_items";

/// A string key-value store that survives process restarts
pub trait Storage: Send + Sync {
    /// Read a value; missing keys and read failures both yield `None`
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

type Entries = BTreeMap<String, String>;

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    // A panic mid-update never leaves the map itself inconsistent
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Storage backed by a single JSON file
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`.
    /// An unreadable or malformed file is treated as empty.
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(read_entries(path).unwrap_or_default()),
        }
    }

    /// Pick up writes made by other processes since the last open or mutation
    fn refresh(&self, entries: &mut Entries) {
        if let Some(current) = read_entries(&self.path) {
            *entries = current;
        }
    }

    fn persist(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory {}", parent.display())
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Current on-disk map. A missing file is empty; an unreadable or malformed one
/// yields `None`.
fn read_entries(path: &Path) -> Option<Entries> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Some(Entries::new()),
        Err(_) => return None,
    };
    match serde_json::from_str::<Entries>(&content) {
        Ok(entries) => Some(entries),
        Err(e) => {
            eprintln!(
                "Warning: ignoring malformed storage file {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        self.refresh(&mut entries);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        self.refresh(&mut entries);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

/// Process-local storage, used with `--ephemeral` and in tests
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<Entries>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with initial entries
    #[cfg(test)]
    pub fn with_entries<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

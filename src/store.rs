//! Durable key-value storage for session credentials.

use crate::error::StoreError;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const TOKEN_KEY: &str = "auth_token";
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";
pub const USER_KEY: &str = "auth_user";
/// Read directly by loan submission when building payloads
pub const USER_ID_KEY: &str = "userId";

pub const SESSION_KEYS: [&str; 4] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, USER_ID_KEY];

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every key, including any the caller does not know about.
    fn clear(&self) -> Result<(), StoreError>;

    /// Apply several writes; `None` removes the key.
    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            match value {
                Some(v) => self.set(key, v)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        lock(&self.entries).clear();
        Ok(())
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let mut map = lock(&self.entries);
        for (key, value) in entries {
            match value {
                Some(v) => map.insert(key.to_string(), v.to_string()),
                None => map.remove(*key),
            };
        }
        Ok(())
    }
}

/// JSON-object file store. Every mutation is flushed to disk before returning.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_batch(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.write_batch(&[(key, None)])
    }

    /// Removes the backing file outright, so it works even when the
    /// temp-file path used by `write_batch` is unusable.
    fn clear(&self) -> Result<(), StoreError> {
        let mut map = lock(&self.entries);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        map.clear();
        Ok(())
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let mut map = lock(&self.entries);
        let mut next = map.clone();
        for (key, value) in entries {
            match value {
                Some(v) => next.insert(key.to_string(), v.to_string()),
                None => next.remove(*key),
            };
        }
        self.persist(&next)?;
        *map = next;
        Ok(())
    }
}

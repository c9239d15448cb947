//! Key-value storage capability.
//!
//! The session store never touches a concrete backend directly; it is handed
//! something implementing [`KeyValueStorage`]. Three backends are provided:
//!
//! - [`MemoryStorage`] keeps everything in a map, for tests and embedding.
//! - [`NullStorage`] stores nothing, for non-interactive contexts.
//! - [`DirectoryStorage`] writes one file per key, atomically.
//!
//! Several processes may share a directory; the last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

/// Minimal string key-value interface.
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// List every key starting with `prefix`.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_keys(prefix)
    }
}

///////////////////////////////////////////// Memory ////////////////////////////////////////////

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new, empty `MemoryStorage`.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

////////////////////////////////////////////// Null /////////////////////////////////////////////

/// Storage that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl KeyValueStorage for NullStorage {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn list_keys(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/////////////////////////////////////////// Directory ///////////////////////////////////////////

const FILE_EXTENSION: &str = "json";

/// One file per key under a directory.
///
/// Keys are percent-escaped into file names so that characters such as `:`
/// survive on every platform.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            Error::io(
                format!("failed to create storage directory {}", root.display()),
                err,
            )
        })?;
        Ok(Self { root })
    }

    /// The directory backing this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{FILE_EXTENSION}", escape_key(key)))
    }
}

impl KeyValueStorage for DirectoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(format!("failed to read {key}"), err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let final_path = self.path_for(key);
        let tmp_path = final_path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        fs::write(&tmp_path, value)
            .map_err(|err| Error::io(format!("failed to write {key}"), err))?;
        match fs::rename(&tmp_path, &final_path) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                if final_path.exists() {
                    fs::remove_file(&final_path)
                        .and_then(|()| fs::rename(&tmp_path, &final_path))
                        .map_err(|err| Error::io(format!("failed to replace {key}"), err))
                } else {
                    let _ = fs::remove_file(&tmp_path);
                    Err(Error::io(format!("failed to write {key}"), rename_err))
                }
            }
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(format!("failed to remove {key}"), err)),
        }
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            Error::io(
                format!("failed to list {}", self.root.display()),
                err,
            )
        })?;
        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Some(key) = unescape_key(stem) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            escaped.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    escaped
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = name.get(idx + 1..idx + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn KeyValueStorage) {
        assert_eq!(storage.get("conversation:1").unwrap(), None);
        storage.set("conversation:1", "{\"a\":1}").unwrap();
        storage.set("conversation:2", "{\"b\":2}").unwrap();
        storage.set("lang", "en").unwrap();
        assert_eq!(
            storage.get("conversation:1").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            storage.list_keys("conversation:").unwrap(),
            vec!["conversation:1".to_string(), "conversation:2".to_string()]
        );
        storage.set("conversation:1", "{\"a\":3}").unwrap();
        assert_eq!(
            storage.get("conversation:1").unwrap().as_deref(),
            Some("{\"a\":3}")
        );
        storage.remove("conversation:1").unwrap();
        storage.remove("conversation:1").unwrap();
        assert_eq!(storage.get("conversation:1").unwrap(), None);
        assert_eq!(
            storage.list_keys("conversation:").unwrap(),
            vec!["conversation:2".to_string()]
        );
    }

    #[test]
    fn memory_storage_contract() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn directory_storage_contract() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::open(dir.path().join("sessions")).unwrap();
        exercise(&storage);
        assert!(storage.root().join("conversation%3A2.json").exists());
    }

    #[test]
    fn directory_storage_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::open(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("conversation%3A9.json.tmp"), "{").unwrap();
        storage.set("conversation:7", "{}").unwrap();
        assert_eq!(
            storage.list_keys("conversation:").unwrap(),
            vec!["conversation:7".to_string()]
        );
    }

    #[test]
    fn null_storage_remembers_nothing() {
        let storage = NullStorage;
        storage.set("conversation:1", "{}").unwrap();
        assert_eq!(storage.get("conversation:1").unwrap(), None);
        assert!(storage.list_keys("").unwrap().is_empty());
    }

    #[test]
    fn key_escaping_round_trips() {
        for key in ["conversation:1714552200000", "a/b c", "plain_key-1", "\u{e9}t\u{e9}"] {
            assert_eq!(unescape_key(&escape_key(key)).as_deref(), Some(key));
        }
        assert_eq!(unescape_key("bad%zz"), None);
    }
}

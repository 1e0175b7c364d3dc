//! Backing stores the cache delegates to

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// A flat key-value byte store.
///
/// Keys are `/`-separated paths. Writes must be atomic per key: a
/// reader never observes a half-written value.
pub trait StorageProvider: Send + Sync {
    /// Returns the value, or `None` when the key does not exist.
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> crate::Result<()>;

    fn has(&self, key: &str) -> crate::Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn del(&self, key: &str) -> crate::Result<()>;
}

/// Keeps everything in a map. The provider used by tests and by
/// datasets that never outlive the process.
#[derive(Default)]
pub struct MemoryProvider {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for MemoryProvider {
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> crate::Result<()> {
        self.values.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn has(&self, key: &str) -> crate::Result<bool> {
        Ok(self.values.lock().contains_key(key))
    }

    fn del(&self, key: &str) -> crate::Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Stores each key as a file under a root directory.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageProvider for LocalProvider {
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> crate::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename keeps the value atomic per key
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn has(&self, key: &str) -> crate::Result<bool> {
        Ok(self.path_for(key).exists())
    }

    fn del(&self, key: &str) -> crate::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

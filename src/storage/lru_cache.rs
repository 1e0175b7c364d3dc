//! A byte-budgeted LRU cache over a backing storage provider

use std::any::Any;
use std::sync::Arc;

use log::{debug, trace};
use lru::LruCache as LruList;
use parking_lot::{Mutex, RwLock};

use super::cachable::Cachable;
use super::provider::StorageProvider;
use crate::TenstoreError;

type SerializeFn = Arc<dyn Fn() -> crate::Result<Vec<u8>> + Send + Sync>;

struct Entry {
    /// The concrete type behind this is always `RwLock<T>` for the `T`
    /// the entry was inserted with.
    object: Arc<dyn Any + Send + Sync>,
    nbytes: usize,
    dirty: bool,
    serialize: SerializeFn,
}

struct CacheState {
    entries: LruList<String, Entry>,
    total_bytes: usize,
}

/// Caches live [`Cachable`] objects in front of a [`StorageProvider`].
///
/// Objects enter the cache either through [`put`](Self::put) (dirty,
/// will be written back) or through a [`get_cachable`](Self::get_cachable)
/// miss (clean, deserialized from the backing store). When the byte
/// budget overflows, the least recently used entries are dropped; dirty
/// entries are always written back first, so eviction never loses data.
/// The most recently used entry is retained even when it alone exceeds
/// the budget.
///
/// Handles are `Arc<RwLock<T>>`. A caller that mutates an object must
/// re-[`put`](Self::put) it so the cache learns about the new size and
/// marks the entry dirty, and must release its write guard before
/// calling back into the cache: serialization takes a read lock on the
/// object.
pub struct LRUCache {
    storage: Arc<dyn StorageProvider>,
    cache_size: usize,
    autoflush: bool,
    state: Mutex<CacheState>,
}

impl LRUCache {
    pub fn new(storage: Arc<dyn StorageProvider>, cache_size: usize) -> Self {
        Self {
            storage,
            cache_size,
            autoflush: true,
            state: Mutex::new(CacheState {
                entries: LruList::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    /// Controls whether [`maybe_flush`](Self::maybe_flush) flushes.
    pub fn with_autoflush(mut self, autoflush: bool) -> Self {
        self.autoflush = autoflush;
        self
    }

    /// Fetches an object, deserializing it from the backing store when
    /// it is not cached.
    pub fn get_cachable<T: Cachable>(&self, key: &str) -> crate::Result<Arc<RwLock<T>>> {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get(key) {
                return entry.object.clone().downcast::<RwLock<T>>().map_err(|_| {
                    TenstoreError::CorruptedMeta(format!(
                        "cached object at '{}' has an unexpected type",
                        key
                    ))
                });
            }
        }

        let buffer = self
            .storage
            .get(key)?
            .ok_or_else(|| TenstoreError::KeyNotFound(key.to_string()))?;
        let object = Arc::new(RwLock::new(T::frombytes(&buffer)?));
        trace!("cache miss for '{}', deserialized {} bytes", key, buffer.len());
        self.insert(key, object.clone(), false)?;
        Ok(object)
    }

    /// Inserts an object as dirty.
    ///
    /// Also the way to report a mutation: re-putting a handle refreshes
    /// the entry's byte accounting and schedules it for write-back.
    pub fn put<T: Cachable>(&self, key: &str, object: &Arc<RwLock<T>>) -> crate::Result<()> {
        self.insert(key, object.clone(), true)
    }

    fn insert<T: Cachable>(
        &self,
        key: &str,
        object: Arc<RwLock<T>>,
        dirty: bool,
    ) -> crate::Result<()> {
        let nbytes = object.read().nbytes();
        let serialize: SerializeFn = {
            let object = object.clone();
            Arc::new(move || object.read().tobytes())
        };

        let mut state = self.state.lock();
        let mut dirty = dirty;
        if let Some(old) = state.entries.pop(key) {
            state.total_bytes -= old.nbytes;
            dirty = dirty || old.dirty;
        }
        state.entries.put(
            key.to_string(),
            Entry {
                object,
                nbytes,
                dirty,
                serialize,
            },
        );
        state.total_bytes += nbytes;
        self.evict_as_needed(&mut state)
    }

    fn evict_as_needed(&self, state: &mut CacheState) -> crate::Result<()> {
        while state.total_bytes > self.cache_size && state.entries.len() > 1 {
            let (key, entry) = match state.entries.pop_lru() {
                Some(evicted) => evicted,
                None => break,
            };
            state.total_bytes -= entry.nbytes;
            if entry.dirty {
                debug!("evicting dirty entry '{}', writing back {} bytes", key, entry.nbytes);
                self.storage.set(&key, &(entry.serialize)()?)?;
            }
        }
        Ok(())
    }

    /// Whether the key is present in the cache or the backing store.
    pub fn contains(&self, key: &str) -> crate::Result<bool> {
        if self.state.lock().entries.contains(key) {
            return Ok(true);
        }
        self.storage.has(key)
    }

    /// Writes every dirty entry back to the backing store.
    pub fn flush(&self) -> crate::Result<()> {
        let mut state = self.state.lock();
        let mut written = 0usize;
        for (key, entry) in state.entries.iter_mut() {
            if entry.dirty {
                self.storage.set(key, &(entry.serialize)()?)?;
                entry.dirty = false;
                written += 1;
            }
        }
        if written > 0 {
            debug!("flushed {} dirty entries", written);
        }
        Ok(())
    }

    /// Advisory flush point; honors the autoflush setting.
    pub fn maybe_flush(&self) -> crate::Result<()> {
        if self.autoflush {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Bytes currently charged against the budget.
    pub fn cached_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn num_entries(&self) -> usize {
        self.state.lock().entries.len()
    }
}

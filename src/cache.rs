//! Generic reference-counted cache.
//!
//! A bounded map from `u64` keys to shared values. Each key is in exactly one
//! of three states: absent, loading (a placeholder while one caller runs the
//! loader) or resident (value present, reference count >= 1). There is no
//! replacement policy: an entry leaves the cache only when its reference count
//! drops back to zero through [`RefCountCache::release`], at which point the
//! value is handed to [`CacheSource::write_back`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::storage::error::{StorageError, StorageResult};

/// Loads values into the cache and persists them on eviction.
pub trait CacheSource: Send + Sync {
    type Value: Clone + Send + Sync;

    /// Produce the value for `key`. Called without the cache lock held.
    fn load(&self, key: u64) -> StorageResult<Self::Value>;

    /// Persist `value` when its last reference is released.
    fn write_back(&self, key: u64, value: &Self::Value) -> StorageResult<()>;
}

struct CacheEntry<V> {
    value: V,
    refs: usize,
}

struct CacheState<V> {
    resident: HashMap<u64, CacheEntry<V>>,
    /// Keys with a load or a write-back in flight.
    busy: HashSet<u64>,
    /// Reserved slots: resident entries plus in-flight loads and write-backs.
    count: usize,
}

pub struct RefCountCache<S: CacheSource> {
    source: S,
    state: Mutex<CacheState<S::Value>>,
    settled: Condvar,
    /// 0 means unbounded.
    max_resources: usize,
}

impl<S: CacheSource> RefCountCache<S> {
    pub fn new(source: S, max_resources: usize) -> Self {
        Self {
            source,
            state: Mutex::new(CacheState {
                resident: HashMap::new(),
                busy: HashSet::new(),
                count: 0,
            }),
            settled: Condvar::new(),
            max_resources,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn max_resources(&self) -> usize {
        self.max_resources
    }

    /// Fetch `key`, loading it if absent.
    ///
    /// Blocks while another caller loads or writes back the same key. Fails
    /// immediately with [`StorageError::CacheFull`] when the key is absent and
    /// every slot is taken.
    pub fn get(&self, key: u64) -> StorageResult<S::Value> {
        let mut state = self.state.lock();
        loop {
            if state.busy.contains(&key) {
                self.settled.wait(&mut state);
                continue;
            }

            if let Some(entry) = state.resident.get_mut(&key) {
                entry.refs += 1;
                return Ok(entry.value.clone());
            }

            if self.max_resources > 0 && state.count >= self.max_resources {
                return Err(StorageError::CacheFull {
                    max_resources: self.max_resources,
                });
            }

            state.count += 1;
            state.busy.insert(key);
            break;
        }
        drop(state);

        let loaded = self.source.load(key);

        let mut state = self.state.lock();
        state.busy.remove(&key);
        let result = match loaded {
            Ok(value) => {
                state.resident.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        refs: 1,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                state.count -= 1;
                debug!("cache load of key {} failed: {}", key, e);
                Err(e)
            }
        };
        drop(state);
        self.settled.notify_all();

        result
    }

    /// Drop one reference to `key`. The last reference writes the value back
    /// and frees its slot.
    pub fn release(&self, key: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        let value = match state.resident.entry(key) {
            Entry::Vacant(_) => return Err(StorageError::NotCached(key)),
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.refs -= 1;
                if entry.refs > 0 {
                    return Ok(());
                }
                occupied.remove().value
            }
        };
        // Getters of this key wait until the write-back has landed.
        state.busy.insert(key);
        drop(state);

        let written = self.source.write_back(key, &value);

        let mut state = self.state.lock();
        state.busy.remove(&key);
        state.count -= 1;
        drop(state);
        self.settled.notify_all();

        written
    }

    /// Write back and evict every resident entry regardless of its reference
    /// count. Only meant for shutdown; concurrent callers are not supported.
    pub fn close(&self) -> StorageResult<()> {
        let drained: Vec<(u64, CacheEntry<S::Value>)> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state.resident.drain().collect();
            state.count -= drained.len();
            drained
        };

        let mut first_error = None;
        for (key, entry) in drained {
            if let Err(e) = self.source.write_back(key, &entry.value) {
                first_error.get_or_insert(e);
            }
        }
        self.settled.notify_all();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of reserved slots, including in-flight loads.
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().resident.get(&key).map(|entry| entry.refs)
    }
}

//! Per-scope mutable state: the Write Buffer, Delete Buffer, Created Set,
//! Deleted-Value Map, Originally-Existed Set, and the local version
//! bookkeeping used for sibling conflict detection.
//!
//! Every transaction — Root or Nested — owns exactly one `Buffers<K, V>`.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::Local;

#[derive(Debug)]
pub struct Buffers<K, V> {
    pub write: HashMap<K, V>,
    pub delete: HashSet<K>,
    pub created: HashSet<K>,
    pub deleted_values: HashMap<K, V>,
    pub originally_existed: HashSet<K>,

    /// This scope's own monotonic tick, bumped on every `create`/`write`/
    /// `delete`. A fresh child snapshots the parent's current value at
    /// `create_nested` time.
    pub local_version: Local,

    /// Last local tick at which each key was touched in this scope.
    pub key_local_versions: HashMap<K, Local>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for Buffers<K, V> {
    fn default() -> Self {
        Buffers {
            write: HashMap::new(),
            delete: HashSet::new(),
            created: HashSet::new(),
            deleted_values: HashMap::new(),
            originally_existed: HashSet::new(),
            local_version: 0,
            key_local_versions: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Buffers<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves this scope's own buffered view of `key`, without
    /// consulting anything outside the scope: `Some(Some(v))` for a
    /// buffered write, `Some(None)` for a buffered delete, `None` if this
    /// scope has not touched the key (: "check the transaction's own
    /// Write Buffer first ... check its Delete Buffer").
    pub fn local_read(&self, key: &K) -> Option<Option<&V>> {
        if let Some(v) = self.write.get(key) {
            return Some(Some(v));
        }
        if self.delete.contains(key) {
            return Some(None);
        }
        None
    }

    fn bump(&mut self, key: &K) -> Local {
        self.local_version += 1;
        self.key_local_versions.insert(key.clone(), self.local_version);
        self.local_version
    }

    /// `create(k, v)` gating and buffering. `exists_on_parent` is
    /// "would `read(k)` yield a value", evaluated by the caller against
    /// whatever lies outside this scope.
    pub fn create(&mut self, key: K, value: V, exists_on_parent: bool) -> Result<(), crate::error::Error> {
        if self.write.contains_key(&key) {
            return Err(crate::error::Error::AlreadyExists);
        }
        if !self.delete.contains(&key) && exists_on_parent {
            return Err(crate::error::Error::AlreadyExists);
        }

        self.write.insert(key.clone(), value);
        self.created.insert(key.clone());
        self.delete.remove(&key);
        self.originally_existed.remove(&key);
        self.bump(&key);
        Ok(())
    }

    /// `write(k, v)` gating and buffering.
    pub fn write(&mut self, key: K, value: V, exists_on_parent: bool) -> Result<(), crate::error::Error> {
        let already_buffered = self.write.contains_key(&key);
        if !already_buffered && (self.delete.contains(&key) || !exists_on_parent) {
            return Err(crate::error::Error::NotFound);
        }

        self.write.insert(key.clone(), value);
        self.delete.remove(&key);
        self.bump(&key);
        Ok(())
    }

    /// `delete(k)` gating and buffering. `parent_value` is whatever
    /// `read(k)` would have produced if this scope's own Write Buffer
    /// didn't already hold `k` — callers pass their own `read(k)`, which
    /// already resolves to `None` when this scope's own Delete Buffer has
    /// tombstoned `k`, so a second `delete` on an already-deleted key
    /// still fails `NotFound` here instead of resurrecting a stale value.
    pub fn delete(&mut self, key: K, parent_value: Option<V>) -> Result<(), crate::error::Error> {
        let pre_image = if let Some(v) = self.write.get(&key) {
            Some(v.clone())
        } else {
            parent_value
        };

        let Some(pre_image) = pre_image else {
            return Err(crate::error::Error::NotFound);
        };

        self.deleted_values.insert(key.clone(), pre_image);
        if !self.created.contains(&key) {
            self.originally_existed.insert(key.clone());
        }

        self.delete.insert(key.clone());
        self.write.remove(&key);
        self.created.remove(&key);
        self.bump(&key);
        Ok(())
    }
}

//! An in-memory backend adapter, one `HashMap` guarded by whatever
//! interior-mutability primitive each flavour needs. There's no ordered
//! `scan` to support — the MVCC layer above never issues one — so a plain
//! `HashMap` is all a key/value store needs here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::Hash;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use super::{AsyncBackend, Backend};

/// Synchronous, single-threaded in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend<K, V> {
    data: RefCell<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> MemoryBackend<K, V> {
    pub fn new() -> Self {
        MemoryBackend { data: RefCell::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Backend<K, V> for MemoryBackend<K, V> {
    type Error = Infallible;

    fn read(&self, key: &K) -> Result<Option<V>, Self::Error> {
        Ok(self.data.borrow().get(key).cloned())
    }

    fn write(&self, key: &K, value: V) -> Result<(), Self::Error> {
        self.data.borrow_mut().insert(key.clone(), value);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), Self::Error> {
        self.data.borrow_mut().remove(key);
        Ok(())
    }

    fn exists(&self, key: &K) -> Result<bool, Self::Error> {
        Ok(self.data.borrow().contains_key(key))
    }
}

/// The `aio` counterpart: same storage, guarded by a (blocking,
/// uncontended-fast) `std::sync::Mutex` rather than `RefCell`, since it
/// must be `Send + Sync` to live behind the async root's `Arc`. No real
/// suspension ever happens inside these calls — they exist to satisfy the
/// `AsyncBackend` contract for an in-memory adapter.
#[derive(Debug, Default)]
pub struct AsyncMemoryBackend<K, V> {
    data: StdMutex<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> AsyncMemoryBackend<K, V> {
    pub fn new() -> Self {
        AsyncMemoryBackend { data: StdMutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<K, V> AsyncBackend<K, V> for AsyncMemoryBackend<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    type Error = Infallible;

    async fn read(&self, key: &K) -> Result<Option<V>, Self::Error> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &K, value: V) -> Result<(), Self::Error> {
        self.data.lock().unwrap().insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), Self::Error> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &K) -> Result<bool, Self::Error> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }
}

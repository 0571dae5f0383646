//! Asynchronous front door.
//!
//! Single logical event loop, suspension points at each backend call. All
//! commits relative to one [`Root`] are serialised through one write
//! critical section (a [`tokio::sync::RwLock`] always taken for writing —
//! reads never take it, since Snapshot Isolation plus the Undo Cache make
//! concurrent reads during a commit safe on their own). Structurally this
//! mirrors `crate::sync` exactly; the only real difference is `Arc` +
//! `tokio::sync::Mutex` standing in for `Rc` + `RefCell`, and every
//! backend call being awaited.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::backend::AsyncBackend;
use crate::config::EngineOptions;
use crate::core::buffers::Buffers;
use crate::core::classify::classify;
use crate::core::conflict::{self, ConflictInfo};
use crate::core::gc;
use crate::core::merge::merge_into_parent;
use crate::core::result::CommitResult;
use crate::core::undo_cache::UndoCache;
use crate::core::version_index::VersionIndex;
use crate::core::visibility::{self, Resolution};
use crate::core::{Local, ScopeId, Version};
use crate::error::Error;

struct Shared<K, V> {
    index: VersionIndex<K>,
    undo: UndoCache<K, V>,
    global_version: Version,
    active: HashMap<ScopeId, Version>,
    next_scope: usize,
    options: EngineOptions,
}

impl<K: Eq + Hash + Clone, V: Clone> Shared<K, V> {
    fn new(options: EngineOptions) -> Self {
        Shared { index: VersionIndex::new(), undo: UndoCache::new(), global_version: 0, active: HashMap::new(), next_scope: 0, options }
    }
}

struct RootInner<K, V, B> {
    backend: B,
    shared: RwLock<Shared<K, V>>,
    buffers: Mutex<Buffers<K, V>>,
    /// The write critical section, held for the entire duration of every
    /// `commit`, nested or root.
    commit_lock: RwLock<()>,
}

pub struct Root<K, V, B> {
    inner: Arc<RootInner<K, V, B>>,
}

impl<K, V, B> Clone for Root<K, V, B> {
    fn clone(&self) -> Self {
        Root { inner: self.inner.clone() }
    }
}

impl<K, V, B> Root<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    B: AsyncBackend<K, V>,
{
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, EngineOptions::default())
    }

    pub fn with_options(backend: B, options: EngineOptions) -> Self {
        Root {
            inner: Arc::new(RootInner {
                backend,
                shared: RwLock::new(Shared::new(options)),
                buffers: Mutex::new(Buffers::new()),
                commit_lock: RwLock::new(()),
            }),
        }
    }

    pub fn transaction(&self) -> Txn<K, V, B> {
        Txn { scope: Scope::Root(self.clone()) }
    }

    pub async fn global_version(&self) -> Version {
        self.inner.shared.read().await.global_version
    }

    async fn snapshot_read(&self, key: &K, snapshot: Version) -> Result<Option<V>, Error> {
        let resolution = {
            let shared = self.inner.shared.read().await;
            visibility::resolve(&shared.index, &shared.undo, key, snapshot)
        };
        match resolution {
            Resolution::Absent => Ok(None),
            Resolution::Unmanaged | Resolution::ReadBackend => {
                self.inner.backend.read(key).await.map_err(|e| Error::Backend(e.to_string()))
            }
            Resolution::Undo(value) => Ok(Some(value)),
        }
    }

    async fn snapshot_exists(&self, key: &K, snapshot: Version) -> Result<bool, Error> {
        let resolved = {
            let shared = self.inner.shared.read().await;
            visibility::resolve_exists(&shared.index, key, snapshot)
        };
        match resolved {
            Some(exists) => Ok(exists),
            None => self.inner.backend.exists(key).await.map_err(|e| Error::Backend(e.to_string())),
        }
    }

    async fn register_active(&self, scope: ScopeId, snapshot: Version) {
        self.inner.shared.write().await.active.insert(scope, snapshot);
    }

    async fn deregister_active(&self, scope: ScopeId) {
        self.inner.shared.write().await.active.remove(&scope);
    }

    async fn fresh_scope_id(&self) -> ScopeId {
        let mut shared = self.inner.shared.write().await;
        let id = ScopeId(shared.next_scope);
        shared.next_scope += 1;
        id
    }

    /// Root merge: persists `buffers` to the backend and bumps the global
    /// version. Caller must already hold the write critical section.
    async fn persist(&self, label: Option<String>, buffers: Buffers<K, V>) -> Result<CommitResult<K, V>, Error> {
        let snapshot = self.global_version().await;

        let conflicting_key = {
            let shared = self.inner.shared.read().await;
            conflict::global_conflict(&buffers, &shared.index, snapshot)
        };
        if let Some(key) = conflicting_key {
            log::debug!("root commit: global conflict on a contested key, rejecting");
            let parent_value = self.snapshot_read(&key, snapshot).await?;
            let child_value = buffers.local_read(&key).and_then(|v| v.cloned());
            return Ok(CommitResult::conflict(label, ConflictInfo { key, parent_value, child_value }, Vec::new(), Vec::new(), Vec::new()));
        }

        let (created, updated, deleted) = classify(&buffers);
        let next_version = snapshot + 1;

        // Undo Cache and Version Index are updated before the backend call
        // they describe, not after: reads never take `commit_lock`, so a
        // concurrent reader on an older snapshot can interleave with this
        // loop at any `.await` point. If the physical write/delete landed
        // first, such a reader could see the new backend state through an
        // index that doesn't know about it yet (or, for a brand-new key,
        // through the `Unmanaged` fallback straight to the backend).
        // Installing the index entry first means that reader's snapshot
        // still resolves to `Absent`/the Undo pre-image instead.
        for (key, value) in buffers.write.iter() {
            let existing = self.inner.backend.read(key).await.map_err(|e| Error::Backend(e.to_string()))?;
            {
                let mut shared = self.inner.shared.write().await;
                if let Some(old) = existing.clone() {
                    shared.undo.push(key.clone(), old, next_version);
                }
                shared.index.append(key.clone(), next_version, true);
            }
            self.inner.backend.write(key, value.clone()).await.map_err(|e| Error::Backend(e.to_string()))?;
        }
        for key in buffers.delete.iter() {
            let existing = self.inner.backend.read(key).await.map_err(|e| Error::Backend(e.to_string()))?;
            {
                let mut shared = self.inner.shared.write().await;
                if let Some(old) = existing {
                    shared.undo.push(key.clone(), old, next_version);
                }
                shared.index.append(key.clone(), next_version, false);
            }
            self.inner.backend.delete(key).await.map_err(|e| Error::Backend(e.to_string()))?;
        }

        let mut shared = self.inner.shared.write().await;
        shared.global_version = next_version;
        if shared.options.gc_on_commit {
            let min_live = gc::min_live_snapshot(shared.active.values().copied(), shared.global_version);
            gc::sweep(&mut shared.index, &mut shared.undo, min_live);
        }
        drop(shared);

        log::info!("root commit applied, global version now {next_version}");
        Ok(CommitResult::success(label, created, updated, deleted))
    }
}

enum Scope<K, V, B> {
    Root(Root<K, V, B>),
    Nested(Arc<Mutex<NestedInner<K, V, B>>>),
}

impl<K, V, B> Clone for Scope<K, V, B> {
    fn clone(&self) -> Self {
        match self {
            Scope::Root(root) => Scope::Root(root.clone()),
            Scope::Nested(inner) => Scope::Nested(inner.clone()),
        }
    }
}

struct NestedInner<K, V, B> {
    parent: Scope<K, V, B>,
    root: Root<K, V, B>,
    scope_id: ScopeId,
    snapshot_version: Version,
    snapshot_local: Local,
    buffers: Buffers<K, V>,
    closed: bool,
}

impl<K, V, B> Scope<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    B: AsyncBackend<K, V>,
{
    async fn root_async(&self) -> Root<K, V, B> {
        match self {
            Scope::Root(root) => root.clone(),
            Scope::Nested(inner) => inner.lock().await.root.clone(),
        }
    }

    async fn is_closed(&self) -> bool {
        match self {
            Scope::Root(_) => false,
            Scope::Nested(inner) => inner.lock().await.closed,
        }
    }

    async fn snapshot_version(&self) -> Version {
        match self {
            Scope::Root(root) => root.global_version().await,
            Scope::Nested(inner) => inner.lock().await.snapshot_version,
        }
    }

    async fn local_read(&self, key: &K) -> Option<Option<V>> {
        match self {
            Scope::Root(root) => root.inner.buffers.lock().await.local_read(key).map(|v| v.cloned()),
            Scope::Nested(inner) => inner.lock().await.buffers.local_read(key).map(|v| v.cloned()),
        }
    }

    async fn local_version(&self) -> Local {
        match self {
            Scope::Root(root) => root.inner.buffers.lock().await.local_version,
            Scope::Nested(inner) => inner.lock().await.buffers.local_version,
        }
    }
}

/// One transaction handle: Root or nested. Cloning shares the same
/// underlying scope (all clones observe the same buffers and close
/// together), mirroring `crate::sync::Txn`.
pub struct Txn<K, V, B> {
    scope: Scope<K, V, B>,
}

impl<K, V, B> Clone for Txn<K, V, B> {
    fn clone(&self) -> Self {
        Txn { scope: self.scope.clone() }
    }
}

impl<K, V, B> Txn<K, V, B>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    B: AsyncBackend<K, V>,
{
    async fn ensure_open(&self) -> Result<(), Error> {
        if self.scope.is_closed().await {
            Err(Error::AlreadyCommitted)
        } else {
            Ok(())
        }
    }

    pub async fn read(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_open().await?;
        if let Some(local) = self.scope.local_read(key).await {
            return Ok(local);
        }
        let root = self.scope.root_async().await;
        let snapshot = self.scope.snapshot_version().await;
        root.snapshot_read(key, snapshot).await
    }

    pub async fn exists(&self, key: &K) -> Result<bool, Error> {
        self.ensure_open().await?;
        if let Some(local) = self.scope.local_read(key).await {
            return Ok(local.is_some());
        }
        let root = self.scope.root_async().await;
        let snapshot = self.scope.snapshot_version().await;
        root.snapshot_exists(key, snapshot).await
    }

    async fn exists_outside_scope(&self, key: &K) -> Result<bool, Error> {
        let root = self.scope.root_async().await;
        let snapshot = self.scope.snapshot_version().await;
        root.snapshot_exists(key, snapshot).await
    }

    pub async fn create(&self, key: K, value: V) -> Result<(), Error> {
        self.ensure_open().await?;
        let exists_on_parent = self.exists_outside_scope(&key).await?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.lock().await.create(key, value, exists_on_parent),
            Scope::Nested(inner) => inner.lock().await.buffers.create(key, value, exists_on_parent),
        }
    }

    pub async fn write(&self, key: K, value: V) -> Result<(), Error> {
        self.ensure_open().await?;
        let exists_on_parent = self.exists_outside_scope(&key).await?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.lock().await.write(key, value, exists_on_parent),
            Scope::Nested(inner) => inner.lock().await.buffers.write(key, value, exists_on_parent),
        }
    }

    pub async fn delete(&self, key: K) -> Result<(), Error> {
        self.ensure_open().await?;
        // "Write Buffer value first, else `read(k)`" — the full in-scope
        // read, not just the outside-scope snapshot, so a key this scope
        // already tombstoned resolves to absent here too instead of
        // falling back to its stale pre-delete snapshot value.
        let parent_value = self.read(&key).await?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.lock().await.delete(key, parent_value),
            Scope::Nested(inner) => inner.lock().await.buffers.delete(key, parent_value),
        }
    }

    pub async fn create_nested(&self) -> Result<Txn<K, V, B>, Error> {
        self.ensure_open().await?;
        let root = self.scope.root_async().await;
        let snapshot_version = self.scope.snapshot_version().await;
        let snapshot_local = self.scope.local_version().await;
        let scope_id = root.fresh_scope_id().await;
        root.register_active(scope_id, snapshot_version).await;

        let inner = NestedInner {
            parent: self.scope.clone(),
            root,
            scope_id,
            snapshot_version,
            snapshot_local,
            buffers: Buffers::new(),
            closed: false,
        };
        Ok(Txn { scope: Scope::Nested(Arc::new(Mutex::new(inner))) })
    }

    pub async fn commit(&self, label: Option<String>) -> Result<CommitResult<K, V>, Error> {
        match &self.scope {
            Scope::Root(root) => {
                let _guard = root.inner.commit_lock.write().await;
                let buffers = std::mem::take(&mut *root.inner.buffers.lock().await);
                root.persist(label, buffers).await
            }
            Scope::Nested(node) => {
                let root = node.lock().await.root.clone();
                let _guard = root.inner.commit_lock.write().await;
                self.commit_nested(node, label).await
            }
        }
    }

    async fn commit_nested(&self, node: &Arc<Mutex<NestedInner<K, V, B>>>, label: Option<String>) -> Result<CommitResult<K, V>, Error> {
        if node.lock().await.closed {
            return Err(Error::AlreadyCommitted);
        }

        // Classified once, up front: whatever happens below, this is what
        // the scope would have contributed, and every non-success return
        // (AncestorCommitted, Conflict) still reports it per the spec.
        let (created, updated, deleted) = classify(&node.lock().await.buffers);

        let ancestor_closed = {
            let mut cursor = node.lock().await.parent.clone();
            loop {
                match cursor {
                    Scope::Root(_) => break false,
                    Scope::Nested(ancestor) => {
                        let (closed, next) = {
                            let locked = ancestor.lock().await;
                            (locked.closed, locked.parent.clone())
                        };
                        if closed {
                            break true;
                        }
                        cursor = next;
                    }
                }
            }
        };
        if ancestor_closed {
            self.close_and_deregister(node).await;
            log::debug!("nested commit: an ancestor already committed, rejecting");
            return Ok(CommitResult::ancestor_committed(label, created, updated, deleted));
        }

        let (snapshot_local, parent) = {
            let locked = node.lock().await;
            (locked.snapshot_local, locked.parent.clone())
        };

        let conflicting_key = {
            let inner = node.lock().await;
            match &parent {
                Scope::Root(root) => {
                    let parent_buffers = root.inner.buffers.lock().await;
                    conflict::sibling_conflict(&inner.buffers, &parent_buffers.key_local_versions, snapshot_local)
                }
                Scope::Nested(parent_node) => {
                    let parent_inner = parent_node.lock().await;
                    conflict::sibling_conflict(&inner.buffers, &parent_inner.buffers.key_local_versions, snapshot_local)
                }
            }
        };

        if let Some(key) = conflicting_key {
            let parent_value = parent.local_read(&key).await.flatten();
            let child_value = node.lock().await.buffers.local_read(&key).and_then(|v| v.cloned());
            self.close_and_deregister(node).await;
            log::debug!("nested commit: sibling conflict on a contested key, rejecting");
            return Ok(CommitResult::conflict(label, ConflictInfo { key, parent_value, child_value }, created, updated, deleted));
        }

        let child_buffers = std::mem::take(&mut node.lock().await.buffers);
        match &parent {
            Scope::Root(root) => merge_into_parent(child_buffers, &mut *root.inner.buffers.lock().await),
            Scope::Nested(parent_node) => merge_into_parent(child_buffers, &mut parent_node.lock().await.buffers),
        }

        self.close_and_deregister(node).await;
        Ok(CommitResult::success(label, created, updated, deleted))
    }

    pub async fn rollback(&self) -> CommitResult<K, V> {
        match &self.scope {
            Scope::Root(root) => {
                *root.inner.buffers.lock().await = Buffers::new();
            }
            Scope::Nested(node) => {
                let closed = node.lock().await.closed;
                if !closed {
                    self.close_and_deregister(node).await;
                }
            }
        }
        CommitResult::rolled_back(None)
    }

    async fn close_and_deregister(&self, node: &Arc<Mutex<NestedInner<K, V, B>>>) {
        let (scope_id, root) = {
            let mut locked = node.lock().await;
            locked.closed = true;
            (locked.scope_id, locked.root.clone())
        };
        root.deregister_active(scope_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::AsyncMemoryBackend;

    fn root() -> Root<String, String, AsyncMemoryBackend<String, String>> {
        Root::new(AsyncMemoryBackend::new())
    }

    #[tokio::test]
    async fn basic_snapshot_isolation() {
        let r = root();
        let setup = r.transaction();
        setup.create("a".into(), "V1".into()).await.unwrap();
        setup.commit(None).await.unwrap();

        let tx1 = r.transaction().create_nested().await.unwrap();
        let tx2 = r.transaction().create_nested().await.unwrap();

        tx1.delete("a".into()).await.unwrap();
        assert!(tx1.commit(None).await.unwrap().success);

        assert_eq!(tx2.read(&"a".into()).await.unwrap(), Some("V1".into()));

        tx2.commit(None).await.unwrap();
        let tx3 = r.transaction().create_nested().await.unwrap();
        assert_eq!(tx3.read(&"a".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_write_conflict() {
        let r = root();
        let setup = r.transaction();
        setup.create("x".into(), "0".into()).await.unwrap();
        setup.commit(None).await.unwrap();

        let root_txn = r.transaction();
        let tx1 = root_txn.create_nested().await.unwrap();
        let tx2 = root_txn.create_nested().await.unwrap();

        tx1.write("x".into(), "A".into()).await.unwrap();
        assert!(tx1.commit(None).await.unwrap().success);

        tx2.write("x".into(), "B".into()).await.unwrap();
        let result = tx2.commit(None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.conflict.unwrap().key, "x");
    }

    #[tokio::test]
    async fn nested_strict_isolation_from_parent_buffers() {
        let r = root();
        let setup = r.transaction();
        setup.create("k".into(), "committed".into()).await.unwrap();
        setup.commit(None).await.unwrap();

        let parent = r.transaction().create_nested().await.unwrap();
        parent.write("k".into(), "uncommitted".into()).await.unwrap();

        let child = parent.create_nested().await.unwrap();
        assert_eq!(child.read(&"k".into()).await.unwrap(), Some("committed".into()));
    }

    #[tokio::test]
    async fn accumulating_results_up_the_chain() {
        let r = root();
        let a = r.transaction().create_nested().await.unwrap();
        let b = a.create_nested().await.unwrap();
        let c = b.create_nested().await.unwrap();

        c.create("C".into(), "v".into()).await.unwrap();
        assert!(c.commit(None).await.unwrap().success);

        b.create("B".into(), "v".into()).await.unwrap();
        let result = b.commit(None).await.unwrap();
        assert!(result.created.iter().any(|(k, _)| k == "C"));
        assert!(result.created.iter().any(|(k, _)| k == "B"));
    }

    #[tokio::test]
    async fn commit_after_ancestor_committed_still_reports_contribution() {
        let r = root();
        let parent = r.transaction().create_nested().await.unwrap();
        let child = parent.create_nested().await.unwrap();

        parent.create("p".into(), "v".into()).await.unwrap();
        assert!(parent.commit(None).await.unwrap().success);

        child.create("c".into(), "v".into()).await.unwrap();
        let result = child.commit(None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.created, vec![("c".to_string(), "v".to_string())]);
    }

    #[tokio::test]
    async fn sibling_conflict_reports_the_childs_would_be_contribution() {
        let r = root();
        let parent = r.transaction().create_nested().await.unwrap();
        let tx1 = parent.create_nested().await.unwrap();
        let tx2 = parent.create_nested().await.unwrap();

        tx1.create("x".into(), "A".into()).await.unwrap();
        assert!(tx1.commit(None).await.unwrap().success);

        tx2.create("x".into(), "B".into()).await.unwrap();
        let result = tx2.commit(None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.created, vec![("x".to_string(), "B".to_string())]);
    }

    #[tokio::test]
    async fn second_delete_on_already_tombstoned_key_fails_not_found() {
        let r = root();
        let setup = r.transaction();
        setup.create("d".into(), "v1".into()).await.unwrap();
        setup.commit(None).await.unwrap();

        let tx = r.transaction().create_nested().await.unwrap();
        tx.delete("d".into()).await.unwrap();
        let err = tx.delete("d".into()).await.unwrap_err();
        assert_eq!(err, Error::NotFound);
    }
}

//! Synchronous front door.
//!
//! Single-threaded cooperative: callers drive all work, the engine holds no
//! internal locks, and correctness under concurrent callers is the caller's
//! responsibility. Everything interesting — the version index, the undo
//! cache, buffer gating, conflict detection, merge, classification, GC — is
//! pure logic borrowed from `crate::core`; this module is only the tree of
//! `Rc<RefCell<_>>` handles that wires that logic to a concrete [`Backend`]
//! and exposes the read/write/commit operation surface on top of it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::backend::Backend;
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

/// State owned by the Root alone: the global version counter, the version
/// index, the undo cache, and the active-transaction set.
struct Shared<K, V> {
    index: VersionIndex<K>,
    undo: UndoCache<K, V>,
    global_version: Version,
    /// snapshot version of every currently-open nested transaction, keyed
    /// by a scope id unique for the life of this Root (invariant 7, 8).
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
    shared: RefCell<Shared<K, V>>,
    buffers: RefCell<Buffers<K, V>>,
}

/// A long-lived root transaction: owns the backend adapter and is the only
/// thing in the tree that ever talks to it.
pub struct Root<K, V, B> {
    inner: Rc<RootInner<K, V, B>>,
}

impl<K, V, B> Clone for Root<K, V, B> {
    fn clone(&self) -> Self {
        Root { inner: self.inner.clone() }
    }
}

impl<K: Eq + Hash + Clone, V: Clone, B: Backend<K, V>> Root<K, V, B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, EngineOptions::default())
    }

    pub fn with_options(backend: B, options: EngineOptions) -> Self {
        Root { inner: Rc::new(RootInner { backend, shared: RefCell::new(Shared::new(options)), buffers: RefCell::new(Buffers::new()) }) }
    }

    /// A handle to the Root as a transaction, implementing the same
    /// `create`/`write`/`delete`/`read`/`exists`/`commit`/`rollback`/
    /// `createNested` surface as any nested scope.
    pub fn transaction(&self) -> Txn<K, V, B> {
        Txn { scope: Scope::Root(self.clone()) }
    }

    pub fn global_version(&self) -> Version {
        self.inner.shared.borrow().global_version
    }

    fn snapshot_read(&self, key: &K, snapshot: Version) -> Result<Option<V>, Error> {
        let resolution = {
            let shared = self.inner.shared.borrow();
            visibility::resolve(&shared.index, &shared.undo, key, snapshot)
        };
        match resolution {
            Resolution::Absent => Ok(None),
            Resolution::Unmanaged | Resolution::ReadBackend => {
                self.inner.backend.read(key).map_err(|e| Error::Backend(e.to_string()))
            }
            Resolution::Undo(value) => Ok(Some(value)),
        }
    }

    fn snapshot_exists(&self, key: &K, snapshot: Version) -> Result<bool, Error> {
        let resolved = {
            let shared = self.inner.shared.borrow();
            visibility::resolve_exists(&shared.index, key, snapshot)
        };
        match resolved {
            Some(exists) => Ok(exists),
            None => self.inner.backend.exists(key).map_err(|e| Error::Backend(e.to_string())),
        }
    }

    fn register_active(&self, scope: ScopeId, snapshot: Version) {
        self.inner.shared.borrow_mut().active.insert(scope, snapshot);
    }

    fn deregister_active(&self, scope: ScopeId) {
        self.inner.shared.borrow_mut().active.remove(&scope);
    }

    fn fresh_scope_id(&self) -> ScopeId {
        let mut shared = self.inner.shared.borrow_mut();
        let id = ScopeId(shared.next_scope);
        shared.next_scope += 1;
        id
    }

    /// Root merge: persists `buffers` to the backend and bumps the global
    /// version.
    fn persist(&self, label: Option<String>, buffers: Buffers<K, V>) -> Result<CommitResult<K, V>, Error> {
        let snapshot = self.global_version();

        let conflicting_key = conflict::global_conflict(&buffers, &self.inner.shared.borrow().index, snapshot);
        if let Some(key) = conflicting_key {
            log::debug!("root commit: global conflict on a contested key, rejecting");
            let parent_value = self.snapshot_read(&key, snapshot)?;
            let child_value = buffers.local_read(&key).and_then(|v| v.cloned());
            return Ok(CommitResult::conflict(label, ConflictInfo { key, parent_value, child_value }, Vec::new(), Vec::new(), Vec::new()));
        }

        let (created, updated, deleted) = classify(&buffers);
        let next_version = snapshot + 1;

        // Undo Cache and Version Index are updated before the backend call
        // they describe, not after, mirroring the async front door: it
        // keeps the two front doors' commit bookkeeping in the same order
        // even though this one never yields mid-loop.
        for (key, value) in buffers.write.iter() {
            let existing = self.inner.backend.read(key).map_err(|e| Error::Backend(e.to_string()))?;
            {
                let mut shared = self.inner.shared.borrow_mut();
                if let Some(old) = existing.clone() {
                    shared.undo.push(key.clone(), old, next_version);
                }
                shared.index.append(key.clone(), next_version, true);
            }
            self.inner.backend.write(key, value.clone()).map_err(|e| Error::Backend(e.to_string()))?;
        }
        for key in buffers.delete.iter() {
            let existing = self.inner.backend.read(key).map_err(|e| Error::Backend(e.to_string()))?;
            {
                let mut shared = self.inner.shared.borrow_mut();
                if let Some(old) = existing {
                    shared.undo.push(key.clone(), old, next_version);
                }
                shared.index.append(key.clone(), next_version, false);
            }
            self.inner.backend.delete(key).map_err(|e| Error::Backend(e.to_string()))?;
        }

        let mut shared = self.inner.shared.borrow_mut();
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

/// Either end of a parent link: the Root itself, or another nested scope.
enum Scope<K, V, B> {
    Root(Root<K, V, B>),
    Nested(Rc<RefCell<NestedInner<K, V, B>>>),
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

impl<K: Eq + Hash + Clone, V: Clone, B: Backend<K, V>> Scope<K, V, B> {
    fn root(&self) -> Root<K, V, B> {
        match self {
            Scope::Root(root) => root.clone(),
            Scope::Nested(inner) => inner.borrow().root.clone(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Scope::Root(_) => false,
            Scope::Nested(inner) => inner.borrow().closed,
        }
    }

    fn snapshot_version(&self) -> Version {
        match self {
            Scope::Root(root) => root.global_version(),
            Scope::Nested(inner) => inner.borrow().snapshot_version,
        }
    }

    fn local_read(&self, key: &K) -> Option<Option<V>> {
        match self {
            Scope::Root(root) => root.inner.buffers.borrow().local_read(key).map(|v| v.cloned()),
            Scope::Nested(inner) => inner.borrow().buffers.local_read(key).map(|v| v.cloned()),
        }
    }

    fn local_version(&self) -> Local {
        match self {
            Scope::Root(root) => root.inner.buffers.borrow().local_version,
            Scope::Nested(inner) => inner.borrow().buffers.local_version,
        }
    }

}

/// One transaction: the Root itself, or a nested scope. Both flavours
/// expose the same operation surface.
pub struct Txn<K, V, B> {
    scope: Scope<K, V, B>,
}

impl<K, V, B> Clone for Txn<K, V, B> {
    fn clone(&self) -> Self {
        Txn { scope: self.scope.clone() }
    }
}

impl<K: Eq + Hash + Clone, V: Clone, B: Backend<K, V>> Txn<K, V, B> {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.scope.is_closed() {
            Err(Error::AlreadyCommitted)
        } else {
            Ok(())
        }
    }

    /// Own buffers first, then the Root's snapshot reader at this scope's
    /// snapshot version. A nested scope never peeks at its parent's
    /// buffers.
    pub fn read(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_open()?;
        if let Some(local) = self.scope.local_read(key) {
            return Ok(local);
        }
        self.scope.root().snapshot_read(key, self.scope.snapshot_version())
    }

    pub fn exists(&self, key: &K) -> Result<bool, Error> {
        self.ensure_open()?;
        if let Some(local) = self.scope.local_read(key) {
            return Ok(local.is_some());
        }
        self.scope.root().snapshot_exists(key, self.scope.snapshot_version())
    }

    fn exists_outside_scope(&self, key: &K) -> Result<bool, Error> {
        self.scope.root().snapshot_exists(key, self.scope.snapshot_version())
    }

    pub fn create(&self, key: K, value: V) -> Result<(), Error> {
        self.ensure_open()?;
        let exists_on_parent = self.exists_outside_scope(&key)?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.borrow_mut().create(key, value, exists_on_parent),
            Scope::Nested(inner) => inner.borrow_mut().buffers.create(key, value, exists_on_parent),
        }
    }

    pub fn write(&self, key: K, value: V) -> Result<(), Error> {
        self.ensure_open()?;
        let exists_on_parent = self.exists_outside_scope(&key)?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.borrow_mut().write(key, value, exists_on_parent),
            Scope::Nested(inner) => inner.borrow_mut().buffers.write(key, value, exists_on_parent),
        }
    }

    pub fn delete(&self, key: K) -> Result<(), Error> {
        self.ensure_open()?;
        // "Write Buffer value first, else `read(k)`" — the full in-scope
        // read, not just the outside-scope snapshot, so a key this scope
        // already tombstoned resolves to absent here too instead of
        // falling back to its stale pre-delete snapshot value.
        let parent_value = self.read(&key)?;
        match &self.scope {
            Scope::Root(root) => root.inner.buffers.borrow_mut().delete(key, parent_value),
            Scope::Nested(inner) => inner.borrow_mut().buffers.delete(key, parent_value),
        }
    }

    /// A fresh child snapshots the caller's own snapshot version (Root:
    /// its current global version; Nested: its own, unchanged) and the
    /// caller's current local version tick.
    pub fn create_nested(&self) -> Result<Txn<K, V, B>, Error> {
        self.ensure_open()?;
        let root = self.scope.root();
        let snapshot_version = self.scope.snapshot_version();
        let snapshot_local = self.scope.local_version();
        let scope_id = root.fresh_scope_id();
        root.register_active(scope_id, snapshot_version);

        let inner = NestedInner {
            parent: self.scope.clone(),
            root,
            scope_id,
            snapshot_version,
            snapshot_local,
            buffers: Buffers::new(),
            closed: false,
        };
        Ok(Txn { scope: Scope::Nested(Rc::new(RefCell::new(inner))) })
    }

    /// Root: persists to the backend. Nested: merges upward into the
    /// immediate parent's buffers.
    pub fn commit(&self, label: Option<String>) -> Result<CommitResult<K, V>, Error> {
        match &self.scope {
            Scope::Root(root) => {
                let buffers = std::mem::take(&mut *root.inner.buffers.borrow_mut());
                root.persist(label, buffers)
            }
            Scope::Nested(node) => self.commit_nested(node, label),
        }
    }

    fn commit_nested(&self, node: &Rc<RefCell<NestedInner<K, V, B>>>, label: Option<String>) -> Result<CommitResult<K, V>, Error> {
        if node.borrow().closed {
            return Err(Error::AlreadyCommitted);
        }

        // Classified once, up front: whatever happens below, this is what
        // the scope would have contributed, and every non-success return
        // (AncestorCommitted, Conflict) still reports it per the spec.
        let (created, updated, deleted) = classify(&node.borrow().buffers);

        // A commit must check the whole ancestor chain, not just its immediate parent.
        let ancestor_closed = {
            let mut cursor = node.borrow().parent.clone();
            loop {
                match cursor {
                    Scope::Root(_) => break false,
                    Scope::Nested(ancestor) => {
                        if ancestor.borrow().closed {
                            break true;
                        }
                        cursor = ancestor.borrow().parent.clone();
                    }
                }
            }
        };
        if ancestor_closed {
            self.close_and_deregister(node);
            log::debug!("nested commit: an ancestor already committed, rejecting");
            return Ok(CommitResult::ancestor_committed(label, created, updated, deleted));
        }

        let snapshot_local = node.borrow().snapshot_local;
        let parent = node.borrow().parent.clone();
        let conflicting_key = {
            let inner = node.borrow();
            match &parent {
                Scope::Root(root) => conflict::sibling_conflict(&inner.buffers, &root.inner.buffers.borrow().key_local_versions, snapshot_local),
                Scope::Nested(parent_node) => conflict::sibling_conflict(&inner.buffers, &parent_node.borrow().buffers.key_local_versions, snapshot_local),
            }
        };

        if let Some(key) = conflicting_key {
            let parent_value = parent.local_read(&key).flatten();
            let child_value = node.borrow().buffers.local_read(&key).and_then(|v| v.cloned());
            self.close_and_deregister(node);
            log::debug!("nested commit: sibling conflict on a contested key, rejecting");
            return Ok(CommitResult::conflict(label, ConflictInfo { key, parent_value, child_value }, created, updated, deleted));
        }

        let child_buffers = std::mem::take(&mut node.borrow_mut().buffers);
        match &parent {
            Scope::Root(root) => merge_into_parent(child_buffers, &mut root.inner.buffers.borrow_mut()),
            Scope::Nested(parent_node) => merge_into_parent(child_buffers, &mut parent_node.borrow_mut().buffers),
        }

        self.close_and_deregister(node);
        Ok(CommitResult::success(label, created, updated, deleted))
    }

    /// Discards local buffers, never touches the backend, never reports
    /// `Conflict`.
    pub fn rollback(&self) -> CommitResult<K, V> {
        match &self.scope {
            Scope::Root(root) => {
                *root.inner.buffers.borrow_mut() = Buffers::new();
            }
            Scope::Nested(node) => {
                if !node.borrow().closed {
                    self.close_and_deregister(node);
                }
            }
        }
        CommitResult::rolled_back(None)
    }

    fn close_and_deregister(&self, node: &Rc<RefCell<NestedInner<K, V, B>>>) {
        let scope_id = node.borrow().scope_id;
        node.borrow_mut().closed = true;
        node.borrow().root.deregister_active(scope_id);
    }
}

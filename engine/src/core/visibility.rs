//! The visibility resolver, split into a pure decision (this module) and
//! the I/O the decision calls for (performed by the `sync`/`aio` front
//! doors, since only they know how to talk to the backend or `.await` on
//! it).

use std::hash::Hash;

use super::undo_cache::UndoCache;
use super::version_index::VersionIndex;
use super::Version;

/// What a caller must do to answer a root-snapshot read for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<V> {
    /// No version-index entry and no undo-cache entry: the key was never
    /// touched through the engine. Defer to the backend's live state.
    Unmanaged,
    /// The key is logically absent at this snapshot.
    Absent,
    /// The live backend value is current as of this snapshot; call
    /// `backend.read(key)`.
    ReadBackend,
    /// The backend has since moved on; the visible value is this
    /// pre-image, already resolved from the Undo Cache.
    Undo(V),
}

impl<V> Resolution<V> {
    pub fn is_present(&self) -> bool {
        !matches!(self, Resolution::Absent)
    }
}

/// Resolves what `read(key)`/`exists(key)` at `snapshot` must do against
/// the Root's committed state, given the version index has at least one
/// record for `key` (callers check `has_entry` themselves, since the
/// "unmanaged" case needs no undo-cache lookup at all).
pub fn resolve<K: Eq + Hash + Clone, V: Clone>(
    index: &VersionIndex<K>,
    undo: &UndoCache<K, V>,
    key: &K,
    snapshot: Version,
) -> Resolution<V> {
    if !index.has_entry(key) {
        return Resolution::Unmanaged;
    }

    let walk = index.walk(key, snapshot);
    let Some(target) = walk.target else {
        return Resolution::Absent;
    };
    if !target.exists {
        return Resolution::Absent;
    }

    match walk.next {
        None => Resolution::ReadBackend,
        Some(next) => match undo.get(key, next.version) {
            Some(value) => Resolution::Undo(value.clone()),
            None => Resolution::ReadBackend,
        },
    }
}

/// `exists(key)` never needs an Undo Cache lookup:
/// it only cares whether `target` is present and `exists`.
pub fn resolve_exists<K: Eq + Hash + Clone>(
    index: &VersionIndex<K>,
    key: &K,
    snapshot: Version,
) -> Option<bool> {
    if !index.has_entry(key) {
        return None; // unmanaged: defer to the backend
    }
    let walk = index.walk(key, snapshot);
    Some(walk.target.map(|r| r.exists).unwrap_or(false))
}

//! Write-write conflict detection, both local (between siblings at a
//! merge into their parent) and global (between a committer and the
//! persisted state at root merge).

use std::hash::Hash;

use super::buffers::Buffers;
use super::version_index::VersionIndex;
use super::{Local, Version};

/// The key plus both sides' values, for reporting in `CommitResult::conflict`.
#[derive(Debug, Clone)]
pub struct ConflictInfo<K, V> {
    pub key: K,
    pub parent_value: Option<V>,
    pub child_value: Option<V>,
}

/// Sibling conflict check: does any key the child touched also appear in
/// the parent's per-key local-version map at a tick later than the
/// child's snapshot local version? If so, a sibling (or the parent
/// itself) touched the key after this child forked.
///
/// Returns the first conflicting key found; no partial merge is ever
/// done, so the caller should stop at the first conflict.
pub fn sibling_conflict<K: Eq + Hash + Clone, V: Clone>(
    child: &Buffers<K, V>,
    parent_key_local_versions: &std::collections::HashMap<K, Local>,
    snapshot_local: Local,
) -> Option<K> {
    child
        .write
        .keys()
        .chain(child.delete.iter())
        .find(|key| {
            parent_key_local_versions
                .get(*key)
                .map(|v| *v > snapshot_local)
                .unwrap_or(false)
        })
        .cloned()
}

/// Global conflict check: does any key the committer touched have a
/// version-index entry newer than the committer's snapshot? If so,
/// another transaction persisted a change to the backend since this
/// snapshot was taken.
pub fn global_conflict<K: Eq + Hash + Clone, V: Clone>(
    buffers: &Buffers<K, V>,
    index: &VersionIndex<K>,
    snapshot: Version,
) -> Option<K> {
    buffers
        .write
        .keys()
        .chain(buffers.delete.iter())
        .find(|key| index.last(key).map(|r| r.version > snapshot).unwrap_or(false))
        .cloned()
}

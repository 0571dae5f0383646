//! Undo Cache / Version Index garbage collection.

use std::hash::Hash;

use super::undo_cache::UndoCache;
use super::version_index::VersionIndex;
use super::Version;

/// The oldest snapshot version any active transaction still needs to read
/// (invariant 8): the minimum over active snapshot versions, or the
/// current global version if no transaction is active.
pub fn min_live_snapshot<I: IntoIterator<Item = Version>>(active: I, current: Version) -> Version {
    active.into_iter().min().unwrap_or(current)
}

/// Runs one GC sweep: prunes the Undo Cache down to entries still needed
/// by `min_live`, and optionally prunes the Version Index down to the
/// single boundary record at or below `min_live` per key.
pub fn sweep<K: Eq + Hash + Clone, V: Clone>(
    index: &mut VersionIndex<K>,
    undo: &mut UndoCache<K, V>,
    min_live: Version,
) {
    undo.gc(min_live);
    index.prune(min_live);
}

//! Nested-merge buffer integration: folds a child scope's buffers into its
//! parent's. Pure data movement; conflict detection lives in `conflict`,
//! the arena bookkeeping (deregistering and closing the child) lives in
//! the `sync`/`aio` front doors since it touches the Root's
//! active-transaction set.

use std::hash::Hash;

use super::buffers::Buffers;

/// Folds `child`'s buffers into `parent`'s, allocating one fresh parent
/// local-version tick `v*` for every touched key, as specified. Consumes
/// `child` since it is about to be discarded by the caller.
pub fn merge_into_parent<K: Eq + Hash + Clone, V: Clone>(
    child: Buffers<K, V>,
    parent: &mut Buffers<K, V>,
) {
    let v_star = parent.local_version + 1;

    for (key, value) in child.write {
        parent.write.insert(key.clone(), value);
        parent.delete.remove(&key);
        parent.key_local_versions.insert(key.clone(), v_star);
        if child.created.contains(&key) {
            parent.created.insert(key);
        }
    }

    for key in child.delete {
        parent.delete.insert(key.clone());
        parent.write.remove(&key);
        parent.created.remove(&key);
        parent.key_local_versions.insert(key.clone(), v_star);
        if let Some(value) = child.deleted_values.get(&key) {
            parent.deleted_values.insert(key.clone(), value.clone());
        }
        if child.originally_existed.contains(&key) {
            parent.originally_existed.insert(key);
        }
    }

    parent.local_version = v_star;
}

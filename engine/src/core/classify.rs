//! Commit-result classification: splits a scope's touched keys into the
//! created/updated/deleted lists a commit or rollback reports.

use std::hash::Hash;

use super::buffers::Buffers;

/// Splits a scope's buffers into the `created`/`updated`/`deleted` lists a
/// `CommitResult` reports, per the classification rule:
///
/// - a Write Buffer key is `created` if it's in the Created Set, else `updated`.
/// - a Delete Buffer key is `deleted` only if it's in the Originally-Existed Set.
pub fn classify<K: Eq + Hash + Clone, V: Clone>(
    buffers: &Buffers<K, V>,
) -> (Vec<(K, V)>, Vec<(K, V)>, Vec<(K, V)>) {
    let mut created = Vec::new();
    let mut updated = Vec::new();
    for (key, value) in &buffers.write {
        if buffers.created.contains(key) {
            created.push((key.clone(), value.clone()));
        } else {
            updated.push((key.clone(), value.clone()));
        }
    }

    let mut deleted = Vec::new();
    for key in &buffers.delete {
        if buffers.originally_existed.contains(key) {
            if let Some(value) = buffers.deleted_values.get(key) {
                deleted.push((key.clone(), value.clone()));
            }
        }
    }

    (created, updated, deleted)
}

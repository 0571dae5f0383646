//! End-to-end scenarios against the public API only.
//! The colocated `#[cfg(test)]` modules in `src/sync.rs`/`src/aio.rs` cover
//! the same ground per front door; these drive both backends that ship
//! with the crate through the full tree-shaped API from outside the crate.

use pretty_assertions::assert_eq;

use kvtx::backend::log_file::LogFileBackend;
use kvtx::backend::memory::MemoryBackend;
use kvtx::sync::Root;

fn memory_root() -> Root<String, String, MemoryBackend<String, String>> {
    Root::new(MemoryBackend::new())
}

#[test]
fn basic_snapshot_isolation_over_memory_backend() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("a".into(), "V1".into()).unwrap();
    setup.commit(None).unwrap();

    let tx1 = root.transaction().create_nested().unwrap();
    let tx2 = root.transaction().create_nested().unwrap();

    tx1.delete("a".into()).unwrap();
    assert!(tx1.commit(None).unwrap().success);

    assert_eq!(tx2.read(&"a".into()).unwrap(), Some("V1".into()));

    tx2.commit(None).unwrap();
    let tx3 = root.transaction().create_nested().unwrap();
    assert_eq!(tx3.read(&"a".into()).unwrap(), None);
}

#[test]
fn basic_snapshot_isolation_over_log_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend: LogFileBackend<String, String> = LogFileBackend::open(dir.path().join("kvtx.log")).unwrap();
    let root = Root::new(backend);

    let setup = root.transaction();
    setup.create("a".into(), "V1".into()).unwrap();
    setup.commit(None).unwrap();

    let tx1 = root.transaction().create_nested().unwrap();
    let tx2 = root.transaction().create_nested().unwrap();

    tx1.delete("a".into()).unwrap();
    assert!(tx1.commit(None).unwrap().success);
    assert_eq!(tx2.read(&"a".into()).unwrap(), Some("V1".into()));
    tx2.commit(None).unwrap();

    let tx3 = root.transaction().create_nested().unwrap();
    assert_eq!(tx3.read(&"a".into()).unwrap(), None);
}

#[test]
fn write_write_conflict_reports_both_values() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("x".into(), "0".into()).unwrap();
    setup.commit(None).unwrap();

    let root_txn = root.transaction();
    let tx1 = root_txn.create_nested().unwrap();
    let tx2 = root_txn.create_nested().unwrap();

    tx1.write("x".into(), "A".into()).unwrap();
    assert!(tx1.commit(None).unwrap().success);

    tx2.write("x".into(), "B".into()).unwrap();
    let result = tx2.commit(None).unwrap();
    assert!(!result.success);
    let conflict = result.conflict.unwrap();
    assert_eq!(conflict.key, "x");
    assert_eq!(conflict.parent_value, Some("A".into()));
    assert_eq!(conflict.child_value, Some("B".into()));
}

#[test]
fn nested_transaction_never_sees_parents_uncommitted_buffer() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("k".into(), "committed".into()).unwrap();
    setup.commit(None).unwrap();

    let parent = root.transaction().create_nested().unwrap();
    parent.write("k".into(), "uncommitted".into()).unwrap();

    let child = parent.create_nested().unwrap();
    assert_eq!(child.read(&"k".into()).unwrap(), Some("committed".into()));

    // the parent's own view still sees its own buffered write
    assert_eq!(parent.read(&"k".into()).unwrap(), Some("uncommitted".into()));
}

#[test]
fn long_reader_survives_fifty_writer_commits() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("h".into(), "G0".into()).unwrap();
    setup.commit(None).unwrap();

    let reader = root.transaction().create_nested().unwrap();

    for i in 1..=50 {
        let writer = root.transaction().create_nested().unwrap();
        writer.write("h".into(), format!("G{i}")).unwrap();
        assert!(writer.commit(None).unwrap().success);
    }

    assert_eq!(reader.read(&"h".into()).unwrap(), Some("G0".into()));

    let fresh = root.transaction().create_nested().unwrap();
    assert_eq!(fresh.read(&"h".into()).unwrap(), Some("G50".into()));
}

#[test]
fn create_then_delete_in_same_scope_reports_neither() {
    let root = memory_root();
    let tx = root.transaction().create_nested().unwrap();
    tx.create("new".into(), "v".into()).unwrap();
    tx.delete("new".into()).unwrap();

    let result = tx.commit(None).unwrap();
    assert!(result.success);
    assert!(result.created.is_empty());
    assert!(result.updated.is_empty());
    assert!(result.deleted.is_empty());
}

#[test]
fn accumulating_results_up_the_chain_and_rollback_drops_only_its_own() {
    let root = memory_root();
    let a = root.transaction().create_nested().unwrap();
    let b = a.create_nested().unwrap();
    let c = b.create_nested().unwrap();

    c.create("C".into(), "v".into()).unwrap();
    assert!(c.commit(None).unwrap().success);

    b.create("B".into(), "v".into()).unwrap();
    let result = b.commit(None).unwrap();
    assert!(result.created.iter().any(|(k, _)| k == "C"));
    assert!(result.created.iter().any(|(k, _)| k == "B"));

    // now with C rolled back instead of committed, B's result carries only B
    let a2 = root.transaction().create_nested().unwrap();
    let b2 = a2.create_nested().unwrap();
    let c2 = b2.create_nested().unwrap();
    c2.create("C2".into(), "v".into()).unwrap();
    c2.rollback();

    b2.create("B2".into(), "v".into()).unwrap();
    let result2 = b2.commit(None).unwrap();
    assert_eq!(result2.created.len(), 1);
    assert_eq!(result2.created[0].0, "B2");
}

#[test]
fn gc_reclaims_undo_entries_once_readers_close() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("g".into(), "v0".into()).unwrap();
    setup.commit(None).unwrap();

    let reader = root.transaction().create_nested().unwrap();
    let writer = root.transaction().create_nested().unwrap();
    writer.write("g".into(), "v1".into()).unwrap();
    assert!(writer.commit(None).unwrap().success);

    // the reader is still open: it must still resolve its frozen snapshot
    assert_eq!(reader.read(&"g".into()).unwrap(), Some("v0".into()));
    reader.rollback();

    // once the reader closes and a further commit runs GC, the oldest live
    // snapshot advances and the stale undo entry may be reclaimed without
    // affecting anyone, since nothing needs it anymore
    let another_writer = root.transaction().create_nested().unwrap();
    another_writer.write("g".into(), "v2".into()).unwrap();
    assert!(another_writer.commit(None).unwrap().success);

    let fresh = root.transaction().create_nested().unwrap();
    assert_eq!(fresh.read(&"g".into()).unwrap(), Some("v2".into()));
}

#[test]
fn ancestor_committed_blocks_descendant_even_read_only() {
    let root = memory_root();
    let parent = root.transaction().create_nested().unwrap();
    let child = parent.create_nested().unwrap();

    parent.create("p".into(), "v".into()).unwrap();
    assert!(parent.commit(None).unwrap().success);

    // child never wrote anything, but per the Open Question resolution it
    // still must fail rather than silently succeed
    let result = child.commit(None).unwrap();
    assert!(!result.success);
}

#[test]
fn ancestor_committed_still_reports_the_childs_would_be_contribution() {
    let root = memory_root();
    let parent = root.transaction().create_nested().unwrap();
    let child = parent.create_nested().unwrap();

    child.create("c".into(), "v".into()).unwrap();

    parent.create("p".into(), "v".into()).unwrap();
    assert!(parent.commit(None).unwrap().success);

    // the merge into the parent is blocked, but the result still carries
    // what the child would have contributed, for callers who want to log it
    let result = child.commit(None).unwrap();
    assert!(!result.success);
    assert_eq!(result.created, vec![("c".to_string(), "v".to_string())]);
}

#[test]
fn sibling_conflict_reports_the_childs_would_be_contribution() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("x".into(), "0".into()).unwrap();
    setup.commit(None).unwrap();

    let root_txn = root.transaction();
    let tx1 = root_txn.create_nested().unwrap();
    let tx2 = root_txn.create_nested().unwrap();

    tx1.write("x".into(), "A".into()).unwrap();
    assert!(tx1.commit(None).unwrap().success);

    tx2.create("y".into(), "new".into()).unwrap();
    tx2.write("x".into(), "B".into()).unwrap();
    let result = tx2.commit(None).unwrap();
    assert!(!result.success);
    assert_eq!(result.created, vec![("y".to_string(), "new".to_string())]);
    assert_eq!(result.updated, vec![("x".to_string(), "B".to_string())]);
}

#[test]
fn second_delete_on_already_tombstoned_key_fails_not_found() {
    let root = memory_root();
    let setup = root.transaction();
    setup.create("d".into(), "v0".into()).unwrap();
    setup.commit(None).unwrap();

    let tx = root.transaction().create_nested().unwrap();
    tx.delete("d".into()).unwrap();
    assert!(tx.delete("d".into()).is_err());
}

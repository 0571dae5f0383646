use kvtx::backend::log_file::LogFileBackend;
use kvtx::backend::memory::AsyncMemoryBackend;
use kvtx::error::Error;
use kvtx::sync::Root;

fn main() {
    println!("Hello, kvtx!");

    run().unwrap();
    async_run();

    println!("Bye~");
}

/// Walks through the scenario from the engine's own doc example, but
/// against a durable `LogFileBackend` instead of the in-memory one, and
/// adds a sibling conflict on top.
fn run() -> Result<(), Error> {
    let storage_dir = tempfile::tempdir()?;
    let backend: LogFileBackend<String, Vec<u8>> = LogFileBackend::open(storage_dir.path().join("kvtx.log"))?;
    let root = Root::new(backend);

    let setup = root.transaction();
    setup.create("a".to_string(), vec![0x01])?;
    setup.create("b".to_string(), vec![0x02])?;
    let result = setup.commit(Some("setup".to_string()))?;
    assert!(result.success);

    // Two siblings forked from the same parent snapshot, touching disjoint
    // keys: both merge cleanly.
    let parent = root.transaction();
    let left = parent.create_nested()?;
    let right = parent.create_nested()?;

    left.write("a".to_string(), vec![0x0a])?;
    right.write("b".to_string(), vec![0x0b])?;
    assert!(left.commit(None)?.success);
    assert!(right.commit(None)?.success);
    assert!(parent.commit(None)?.success);

    // A contested key: the second committer sees a `Conflict`, not a panic.
    let racer_1 = root.transaction().create_nested()?;
    let racer_2 = root.transaction().create_nested()?;
    racer_1.write("a".to_string(), vec![0x11])?;
    racer_2.write("a".to_string(), vec![0x22])?;
    assert!(racer_1.commit(None)?.success);
    let lost = racer_2.commit(None)?;
    assert!(!lost.success);
    assert_eq!(lost.conflict.unwrap().key, "a");

    let verify = root.transaction();
    assert_eq!(verify.read(&"a".to_string())?, Some(vec![0x11]));
    assert_eq!(verify.read(&"b".to_string())?, Some(vec![0x0b]));

    Ok(())
}

/// Same transaction tree, driven through the `aio` front door instead,
/// on a single-threaded current-thread runtime.
fn async_run() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let root = kvtx::aio::Root::new(AsyncMemoryBackend::<String, i32>::new());

        let setup = root.transaction();
        setup.create("count".to_string(), 0).await.unwrap();
        assert!(setup.commit(None).await.unwrap().success);

        let tx = root.transaction().create_nested().await.unwrap();
        let current = tx.read(&"count".to_string()).await.unwrap().unwrap();
        tx.write("count".to_string(), current + 1).await.unwrap();
        assert!(tx.commit(None).await.unwrap().success);

        let verify = root.transaction();
        assert_eq!(verify.read(&"count".to_string()).await.unwrap(), Some(1));
    });
}

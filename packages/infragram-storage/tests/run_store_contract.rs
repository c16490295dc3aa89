//! Contract tests shared by every RunStore adapter

use infragram_storage::{FsRunStore, MemoryRunStore, Run, RunStatus, RunStore};
use std::collections::HashSet;
use std::sync::Arc;

async fn check_contract(store: Arc<dyn RunStore>) {
    // Concurrent allocations never collide
    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.allocate_run("shop").await }));
    }
    let mut ids = HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap().unwrap();
        assert!(ids.insert(id));
    }

    let run_id = ids.iter().next().unwrap().clone();

    // Absent artifact is Ok(None)
    assert!(store
        .read_artifact("shop", &run_id, "parsed-graph.json")
        .await
        .unwrap()
        .is_none());

    store
        .write_artifact("shop", &run_id, "parsed-graph.json", b"{}")
        .await
        .unwrap();
    assert!(store
        .read_artifact("shop", &run_id, "parsed-graph.json")
        .await
        .unwrap()
        .is_some());

    let mut run = Run::new(run_id.clone(), "shop");
    run.status = RunStatus::Failed;
    store.write_manifest("shop", &run_id, &run).await.unwrap();

    let listed = store.list_runs("shop").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, run_id);
    assert_eq!(listed[0].status, RunStatus::Failed);

    // Allocated ids cannot be pinned again
    assert!(store.pin_run("shop", &run_id).await.is_err());
}

#[tokio::test]
async fn test_fs_store_contract() {
    let tmp = tempfile::tempdir().unwrap();
    check_contract(Arc::new(FsRunStore::new(tmp.path()))).await;
}

#[tokio::test]
async fn test_memory_store_contract() {
    check_contract(Arc::new(MemoryRunStore::new())).await;
}

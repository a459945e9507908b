use rpdb_store::{KvStore, KvStoreExt, Store, StoreConfig};
use serde_json::json;
use std::time::{Duration, Instant};
use tempfile::TempDir;

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_recycler_flushes_and_evicts() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = StoreConfig::new(tmp.path().join("db"))
        .with_recycle_interval(Duration::from_millis(50))
        .with_vitality(2);
    let store = Store::open(cfg.clone()).await.expect("open");

    store.set("abc", &json!({"v": 1})).await.expect("set");
    let slice_file = cfg.root.join("slices").join("a9.json");

    let flushed = wait_until(Duration::from_secs(5), || {
        let path = slice_file.clone();
        async move { path.exists() }
    })
    .await;
    assert!(flushed, "recycler never flushed the slice");

    let evicted = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.stats().await.loaded_slices == 0 }
    })
    .await;
    assert!(evicted, "recycler never evicted the idle slice");

    let health = store.recycler_health();
    assert!(health.running);
    assert!(health.ticks >= 2);
    assert_eq!(health.consecutive_failures, 0);

    assert_eq!(
        store.get_value("abc").await.expect("get"),
        Some(json!({"v": 1}))
    );
    store.close().await.expect("close");
}

async fn reopen_when_released(cfg: &StoreConfig) -> Store {
    for _ in 0..100 {
        match Store::open(cfg.clone()).await {
            Ok(store) => return store,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("store lock was never released");
}

#[tokio::test]
async fn dropping_last_handle_flushes_pending_writes() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = StoreConfig::new(tmp.path().join("db"))
        .with_recycle_interval(Duration::from_secs(3600));

    {
        let store = Store::open(cfg.clone()).await.expect("open");
        store.set("kept", &7u32).await.expect("set");
    }

    // The recycler finishes its final flush and releases the lock.
    let store = reopen_when_released(&cfg).await;
    assert_eq!(store.get::<u32>("kept").await.expect("get"), Some(7));
    store.close().await.expect("close");
}

#[tokio::test]
async fn drop_after_failed_close_still_flushes() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = StoreConfig::new(tmp.path().join("db"))
        .with_recycle_interval(Duration::from_secs(3600));

    {
        let store = Store::open(cfg.clone()).await.expect("open");
        store.set("abc", &1u32).await.expect("set");
        let blocker = cfg.root.join("slices").join("a9.json");
        tokio::fs::create_dir_all(&blocker).await.expect("block slice");

        assert!(store.close().await.is_err());
        store.set("def", &2u32).await.expect("set after failed close");
        tokio::fs::remove_dir(&blocker).await.expect("unblock slice");
    }

    let store = reopen_when_released(&cfg).await;
    assert_eq!(store.get::<u32>("abc").await.expect("get"), Some(1));
    assert_eq!(store.get::<u32>("def").await.expect("get"), Some(2));
    store.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_writers_across_slices() {
    let tmp = TempDir::new().expect("tempdir");
    let cfg = StoreConfig::new(tmp.path().join("db"))
        .with_recycle_interval(Duration::from_millis(10))
        .with_vitality(1)
        .with_max_loaded_slices(4);
    let store = Store::open(cfg).await.expect("open");

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                store
                    .set(&format!("w{worker}-{i}"), &(worker * 1000 + i))
                    .await
                    .expect("set");
            }
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    assert_eq!(store.len().await.expect("len"), 200);
    for worker in 0..4 {
        for i in (0..50).step_by(7) {
            assert_eq!(
                store
                    .get::<i32>(&format!("w{worker}-{i}"))
                    .await
                    .expect("get"),
                Some(worker * 1000 + i)
            );
        }
    }
    store.close().await.expect("close");
}

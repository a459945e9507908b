use pretty_assertions::assert_eq;
use rpdb_store::migrate::{cached_to_direct, legacy_to_cached};
use rpdb_store::{
    read_meta, DirectStore, KvStore, KvStoreExt, Layout, LegacyStore, Store, StoreConfig,
};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;

fn cached_config(root: &std::path::Path) -> StoreConfig {
    StoreConfig::new(root).with_recycle_interval(Duration::from_secs(3600))
}

#[tokio::test]
async fn legacy_to_cached_to_direct() {
    let tmp = TempDir::new().expect("tempdir");
    let legacy_path = tmp.path().join("old.json");
    let cached_root = tmp.path().join("cached");
    let direct_root = tmp.path().join("direct");

    let legacy = LegacyStore::open(&legacy_path).await.expect("open legacy");
    let mut expected = Vec::new();
    for i in 0..40 {
        let key = format!("user:{i}");
        let value = json!({"id": i, "name": format!("u{i}")});
        legacy.set(&key, &value).await.expect("set");
        expected.push((key, value));
    }
    legacy.close().await.expect("close legacy");

    let report = legacy_to_cached(&legacy_path, cached_config(&cached_root))
        .await
        .expect("legacy -> cached");
    assert_eq!(report.source_keys, 40);
    assert_eq!(report.copied, 40);

    let meta = read_meta(&cached_root).await.expect("meta").expect("meta exists");
    assert_eq!(meta.layout, Layout::Cached);

    let report = cached_to_direct(
        cached_config(&cached_root),
        StoreConfig::new(&direct_root).with_prefix_len(3),
    )
    .await
    .expect("cached -> direct");
    assert_eq!(report.copied, 40);

    let direct = DirectStore::open(StoreConfig::new(&direct_root))
        .await
        .expect("open direct");
    assert_eq!(direct.meta().prefix_len, 3);
    let mut keys: Vec<String> = expected.iter().map(|(k, _)| k.clone()).collect();
    keys.sort();
    assert_eq!(direct.keys().await.expect("keys"), keys);
    for (key, value) in &expected {
        assert_eq!(direct.get_value(key).await.expect("get").as_ref(), Some(value));
    }
    direct.close().await.expect("close direct");

    // The source store is untouched.
    let cached = Store::open(cached_config(&cached_root)).await.expect("reopen");
    assert_eq!(cached.len().await.expect("len"), 40);
    let first: Option<Value> = cached.get("user:0").await.expect("get");
    assert_eq!(first, Some(json!({"id": 0, "name": "u0"})));
    cached.close().await.expect("close");
}

#[tokio::test]
async fn legacy_migration_into_locked_store_fails_cleanly() {
    let tmp = TempDir::new().expect("tempdir");
    let legacy_path = tmp.path().join("old.json");
    let cached_root = tmp.path().join("cached");

    let legacy = LegacyStore::open(&legacy_path).await.expect("open legacy");
    legacy.set("a", &1).await.expect("set");
    legacy.close().await.expect("close");

    let holder = Store::open(cached_config(&cached_root)).await.expect("open");
    let err = legacy_to_cached(&legacy_path, cached_config(&cached_root))
        .await
        .expect_err("target is locked");
    assert!(err.to_string().contains("locked"));
    holder.close().await.expect("close");

    // The legacy lock was released on the error path.
    let legacy = LegacyStore::open(&legacy_path).await.expect("reopen legacy");
    assert_eq!(legacy.len().await.expect("len"), 1);
    legacy.close().await.expect("close");
}

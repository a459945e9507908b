use crate::config::StoreConfig;
use crate::direct::DirectStore;
use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::legacy::LegacyStore;
use crate::meta::read_meta;
use crate::store::Store;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub source_keys: usize,
    pub copied: usize,
    /// Keys listed by the source that vanished before they could be read
    pub skipped: usize,
    pub time_ms: u64,
}

/// Copy every key from `source` into `target`, then flush `target`.
pub async fn copy_all(source: &dyn KvStore, target: &dyn KvStore) -> Result<MigrationReport> {
    let start = Instant::now();
    let keys = source.keys().await?;
    let mut report = MigrationReport {
        source_keys: keys.len(),
        ..MigrationReport::default()
    };

    for key in keys {
        match source.get_value(&key).await? {
            Some(value) => {
                target.set_value(&key, value).await?;
                report.copied += 1;
            }
            None => report.skipped += 1,
        }
    }
    target.flush().await?;
    report.time_ms = start.elapsed().as_millis() as u64;

    if report.copied != report.source_keys {
        return Err(StoreError::MigrationIncomplete {
            expected: report.source_keys,
            copied: report.copied,
        });
    }
    Ok(report)
}

/// Move a single-file legacy database into a cached store directory.
/// The legacy file must exist.
pub async fn legacy_to_cached(legacy_path: &Path, target: StoreConfig) -> Result<MigrationReport> {
    if !tokio::fs::try_exists(legacy_path).await? {
        return Err(StoreError::MissingSource(legacy_path.to_path_buf()));
    }
    log::info!(
        "Migrating legacy store {} -> {}",
        legacy_path.display(),
        target.root.display()
    );
    let source = LegacyStore::open(legacy_path).await?;
    let store = Store::open(target).await?;
    let result = copy_all(&source, &store).await;
    let closed = store.close().await;
    source.close().await?;
    let report = result?;
    closed?;
    log::info!("Migrated {} keys in {}ms", report.copied, report.time_ms);
    Ok(report)
}

/// Move a cached store directory into a direct store directory.
/// The source must already be a store (it has a `meta.json`).
pub async fn cached_to_direct(source: StoreConfig, target: StoreConfig) -> Result<MigrationReport> {
    if same_location(&source.root, &target.root) {
        return Err(StoreError::InvalidConfig(format!(
            "source and target are the same directory: {}",
            source.root.display()
        )));
    }
    if read_meta(&source.root).await?.is_none() {
        return Err(StoreError::MissingSource(source.root));
    }
    log::info!(
        "Migrating cached store {} -> direct store {}",
        source.root.display(),
        target.root.display()
    );
    let cached = Store::open(source).await?;
    let direct = match DirectStore::open(target).await {
        Ok(direct) => direct,
        Err(err) => {
            cached.close().await?;
            return Err(err);
        }
    };
    let result = copy_all(&cached, &direct).await;
    direct.close().await?;
    cached.close().await?;
    let report = result?;
    log::info!("Migrated {} keys in {}ms", report.copied, report.time_ms);
    Ok(report)
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

use crate::codec::ValueCodec;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::hashing::slice_id_for_key;
use crate::kv::KvStore;
use crate::lock::{acquire_store_lock, lock_path_for_root, StoreLock};
use crate::meta::{reconcile_meta, Layout, StoreMeta};
use crate::slice::{list_slice_files, slice_path, Slice};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

/// Sharded store without a cache: every call goes straight to the slice file.
pub struct DirectStore {
    root: PathBuf,
    meta: StoreMeta,
    pretty: bool,
    // `None` once closed
    lock: Mutex<Option<StoreLock>>,
}

impl DirectStore {
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Opening direct store at {}", config.root.display());
        tokio::fs::create_dir_all(&config.root).await?;
        let lock = acquire_store_lock(lock_path_for_root(&config.root)).await?;
        let meta = reconcile_meta(&config.root, Layout::Direct, config.prefix_len).await?;
        Ok(Self {
            root: config.root,
            meta,
            pretty: config.pretty,
            lock: Mutex::new(Some(lock)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn codec(&self) -> ValueCodec {
        self.meta.codec
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        slice_path(&self.root, &slice_id_for_key(key, self.meta.prefix_len))
    }

    async fn guard(&self) -> Result<MutexGuard<'_, Option<StoreLock>>> {
        let guard = self.lock.lock().await;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    pub async fn close(&self) -> Result<()> {
        if self.lock.lock().await.take().is_some() {
            log::info!("Closed direct store at {}", self.root.display());
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for DirectStore {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.guard().await?;
        let slice = Slice::load(&self.path_for_key(key)).await?;
        slice
            .get(key)
            .map(|cell| self.codec().decode(key, cell))
            .transpose()
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let cell = self.codec().encode(key, &value)?;
        let _guard = self.guard().await?;
        let path = self.path_for_key(key);
        let mut slice = Slice::load(&path).await?;
        slice.insert(key.to_string(), cell);
        slice.save(&path, self.pretty).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.guard().await?;
        let path = self.path_for_key(key);
        let mut slice = Slice::load(&path).await?;
        if slice.remove(key).is_none() {
            return Ok(false);
        }
        slice.save(&path, self.pretty).await?;
        Ok(true)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let _guard = self.guard().await?;
        Ok(Slice::load(&self.path_for_key(key)).await?.contains(key))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.guard().await?;
        let mut keys = BTreeSet::new();
        for id in list_slice_files(&self.root, self.meta.prefix_len).await? {
            let slice = Slice::load(&slice_path(&self.root, &id)).await?;
            keys.extend(slice.keys().cloned());
        }
        Ok(keys.into_iter().collect())
    }

    async fn flush(&self) -> Result<()> {
        self.guard().await.map(|_| ())
    }
}
